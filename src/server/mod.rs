//! Server side of the protocol
//!
//! `Connection` is the state machine of a single client connection, the
//! application plugs in with the `Handler` trait.
pub mod request;
pub mod protocol;
pub mod context;
pub mod parser;
pub mod body;
pub mod error;
pub mod connection;
mod writer;

pub use self::request::{Head, Header};
pub use self::protocol::{Handler, Action};
pub use self::context::Config;
pub use self::error::{RequestError, ErrorKind, HttpError};
pub use self::connection::{Connection, ConnectionHandle, Interest, Phase};
pub use self::writer::http_date;


// MAX_HEADERS_SIZE can be changed per daemon in `Config`, but
// MAX_HEADERS_NUM can't because httparse needs the array of headers
// preallocated on the stack.

/// Note httparse requires we preallocate array of this size so be wise
pub const MAX_HEADERS_NUM: usize = 256;
/// Default limit of the request head, see `Config::max_header_size`
pub const MAX_HEADERS_SIZE: usize = 16384;
/// Maximum length of chunk size line (including extensions)
pub const MAX_CHUNK_HEAD: usize = 128;
