use std::fmt;


quick_error! {
    /// Error of configuring a response
    ///
    /// These are reported to the caller right away and never affect the
    /// connection the response is (or will be) sent over.
    #[derive(Debug, PartialEq, Eq)]
    pub enum OptionError {
        /// The response was already handed over for transmission
        TooLate {
            display("response is already finalized")
        }
        Unknown(code: u32) {
            display("unknown response option {}", code)
        }
        /// Header name is not a token or value contains a line break
        BadHeader {
            display("invalid header name or value")
        }
    }
}

/// Callback run once the last handle to a response is gone
pub type TerminationCallback = Box<dyn FnOnce() + Send>;

/// A single entry of the response option list
///
/// Options are applied in order by `Response::set_options`, until `End`
/// or the end of the list.
pub enum ResponseOption {
    /// Stops processing of the list successfully
    End,
    /// The response may be attached to many requests
    Reusable(bool),
    /// Send headers only, never the body
    HeadOnly(bool),
    /// Use chunked framing even when the length is known
    ChunkedEncoding(bool),
    /// Close the connection after the response
    ConnectionClose(bool),
    /// Serve HTTP/1.0 clients: no chunking, always close
    Http10CompatibleStrict(bool),
    /// Behave like an HTTP/1.0 server
    Http10Server(bool),
    /// Send an application `Content-Length` header verbatim
    InsanityHeaderContentLength(bool),
    TerminationCallback(Option<TerminationCallback>),
    /// Code not known to this version of the library
    Unknown(u32),
}

impl ResponseOption {
    /// Maps a numeric option code
    ///
    /// Code `0` is `End`, codes `1` to `7` are the flags in declaration
    /// order set to `value`, code `8` clears the termination callback.
    pub fn from_code(code: u32, value: bool) -> ResponseOption {
        use self::ResponseOption::*;
        match code {
            0 => End,
            1 => Reusable(value),
            2 => HeadOnly(value),
            3 => ChunkedEncoding(value),
            4 => ConnectionClose(value),
            5 => Http10CompatibleStrict(value),
            6 => Http10Server(value),
            7 => InsanityHeaderContentLength(value),
            8 => TerminationCallback(None),
            _ => Unknown(code),
        }
    }
}

impl fmt::Debug for ResponseOption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ResponseOption::*;
        match *self {
            End => f.write_str("End"),
            Reusable(x) => write!(f, "Reusable({})", x),
            HeadOnly(x) => write!(f, "HeadOnly({})", x),
            ChunkedEncoding(x) => write!(f, "ChunkedEncoding({})", x),
            ConnectionClose(x) => write!(f, "ConnectionClose({})", x),
            Http10CompatibleStrict(x) => {
                write!(f, "Http10CompatibleStrict({})", x)
            }
            Http10Server(x) => write!(f, "Http10Server({})", x),
            InsanityHeaderContentLength(x) => {
                write!(f, "InsanityHeaderContentLength({})", x)
            }
            TerminationCallback(ref cb) => {
                write!(f, "TerminationCallback({})",
                    if cb.is_some() { "Some(..)" } else { "None" })
            }
            Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// Flags of a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    pub reusable: bool,
    pub head_only: bool,
    pub chunked_encoding: bool,
    pub connection_close: bool,
    pub http10_compatible_strict: bool,
    pub http10_server: bool,
    pub insanity_header_content_length: bool,
}

/// What applying a single option asks the caller to do
pub(crate) enum Applied {
    Next,
    Stop,
    Callback(Option<TerminationCallback>),
}

impl Options {
    pub(crate) fn apply(&mut self, option: ResponseOption)
        -> Result<Applied, OptionError>
    {
        use self::ResponseOption::*;
        match option {
            End => return Ok(Applied::Stop),
            Reusable(x) => self.reusable = x,
            HeadOnly(x) => self.head_only = x,
            ChunkedEncoding(x) => self.chunked_encoding = x,
            ConnectionClose(x) => self.connection_close = x,
            Http10CompatibleStrict(x) => self.http10_compatible_strict = x,
            Http10Server(x) => self.http10_server = x,
            InsanityHeaderContentLength(x) => {
                self.insanity_header_content_length = x;
            }
            TerminationCallback(cb) => return Ok(Applied::Callback(cb)),
            Unknown(code) => return Err(OptionError::Unknown(code)),
        }
        Ok(Applied::Next)
    }
}

#[cfg(test)]
mod test {
    use super::{ResponseOption, Options, OptionError, Applied};

    #[test]
    fn codes() {
        assert!(matches!(ResponseOption::from_code(0, true),
                         ResponseOption::End));
        assert!(matches!(ResponseOption::from_code(4, true),
                         ResponseOption::ConnectionClose(true)));
        assert!(matches!(ResponseOption::from_code(7, false),
                         ResponseOption::InsanityHeaderContentLength(false)));
        assert!(matches!(ResponseOption::from_code(8, true),
                         ResponseOption::TerminationCallback(None)));
        assert!(matches!(ResponseOption::from_code(42, true),
                         ResponseOption::Unknown(42)));
    }

    #[test]
    fn apply() {
        let mut opt = Options::default();
        assert!(matches!(opt.apply(ResponseOption::HeadOnly(true)),
                         Ok(Applied::Next)));
        assert!(opt.head_only);
        assert!(matches!(opt.apply(ResponseOption::End), Ok(Applied::Stop)));
        assert_eq!(opt.apply(ResponseOption::Unknown(99)).err(),
                   Some(OptionError::Unknown(99)));
    }

    #[test]
    fn debug() {
        let cb = ResponseOption::TerminationCallback(Some(Box::new(|| ())));
        assert_eq!(format!("{:?}", cb), "TerminationCallback(Some(..))");
    }
}
