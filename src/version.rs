use std::fmt::{self, Display};

/// Represents a version of the HTTP spec.
///
/// Only HTTP/1.x is spoken by the engine. HTTP/0.9 requests are rejected
/// by the head parser, HTTP/2 is not supported.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Version {
    /// HTTP/1.0 protocol version.
    Http10,
    /// HTTP/1.1 protocol version as described in RFC7230 and others.
    Http11,
}

impl Version {
    /// Converts the minor version number reported by `httparse`
    pub fn from_minor(minor: u8) -> Version {
        match minor {
            0 => Version::Http10,
            _ => Version::Http11,
        }
    }
    /// Whether the version allows `Transfer-Encoding: chunked`
    pub fn supports_chunked(&self) -> bool {
        *self == Version::Http11
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        })
    }
}
