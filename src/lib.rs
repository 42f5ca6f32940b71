//! An embeddable HTTP/1.x server engine
//!
//! The engine owns framing, transport encryption and response delivery of
//! every connection, the application supplies a `Handler` and response
//! content. Listening and scheduling stay with the application: it accepts
//! sockets, hands them to `Daemon::accept()` and calls
//! `Connection::process()` when the socket is ready.
#[macro_use] extern crate quick_error;
#[macro_use] extern crate log;
extern crate httparse;
extern crate chrono;
#[cfg(feature="tls")] extern crate rustls;
#[cfg(feature="tls")] extern crate rustls_pemfile;

pub mod transport;
pub mod response;
pub mod upload;
pub mod server;
pub mod daemon;
mod headers;
pub mod status;
mod version;

pub use version::Version;
pub use daemon::Daemon;
pub use response::{Response, ResponseOption, OptionError, Produce};
pub use response::ContentReader;
pub use server::{Action, Handler, Head, Config, Connection, ConnectionHandle};
pub use server::{Interest, Phase, RequestError};
pub use transport::{Backend, Session, Socket};
pub use upload::{Upload, UploadAction, Field, UploadReader, PostReader};
