use std::io;
use std::str::Utf8Error;

use httparse;

use crate::status;
use crate::transport::TransportError;
use crate::upload::UploadError;


quick_error!{
    /// Error type which is passed to `Handler::error_page`
    ///
    /// Note, you should not match the enum values and/or make an exhaustive
    /// match over the enum. More errors will be added at will.
    ///
    /// Use `kind()` or the `HttpError` trait instead
    #[derive(Debug)]
    pub enum RequestError {
        HeadersAreTooLarge {
            display("headers are larger than the configured limit")
        }
        BadHeaders(e: httparse::Error) {
            from()
            display("error parsing headers: {:?}", e)
        }
        InvalidChunkSize {
            display("error parsing chunk size")
        }
        BadChunkFraming {
            display("chunk data is not followed by a line end")
        }
        DuplicateContentLength {
            display("conflicting `Content-Length` headers in request")
        }
        ConflictingFraming {
            display("both `Content-Length` and `Transfer-Encoding` in request")
        }
        UnsupportedTransferEncoding {
            display("transfer coding other than `chunked` in request")
        }
        BadContentLength {
            display("error parsing `Content-Length` header")
        }
        BadUtf8(err: Utf8Error) {
            from()
            display("bad utf8 in one of the crucial headers: {}", err)
            source(err)
        }
        PrematureEndOfStream {
            display("premature end of stream")
        }
        Upload(err: UploadError) {
            from()
            display("{}", err)
            source(err)
        }
        Transport(err: TransportError) {
            from()
            display("{}", err)
            source(err)
        }
        /// Reading response content from a file failed
        ContentIo(err: io::Error) {
            display("error reading response content: {}", err)
            source(err)
        }
        /// The handler or a content callback answered something impossible
        Contract(reason: &'static str) {
            display("contract violation: {}", reason)
        }
        IdleTimeout {
            display("connection idle for too long")
        }
    }
}

/// Classification of request errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, an error page is sent if possible
    ProtocolViolation,
    /// I/O or handshake failure, the connection is aborted
    TransportError,
    /// Handler or callback misbehaved, the connection is aborted
    ContractViolation,
    /// Some size limit is exceeded, an error page is sent if possible
    ResourceExhaustion,
    Timeout,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        use self::RequestError::*;
        match *self {
            HeadersAreTooLarge => ErrorKind::ResourceExhaustion,
            BadHeaders(httparse::Error::TooManyHeaders) => {
                ErrorKind::ResourceExhaustion
            }
            BadHeaders(_) | InvalidChunkSize | BadChunkFraming
            | DuplicateContentLength | ConflictingFraming
            | UnsupportedTransferEncoding | BadContentLength | BadUtf8(_)
            | PrematureEndOfStream
            => ErrorKind::ProtocolViolation,
            Upload(UploadError::TooLarge)
            | Upload(UploadError::FieldHeadTooLarge)
            => ErrorKind::ResourceExhaustion,
            Upload(UploadError::Contract(_)) => ErrorKind::ContractViolation,
            Upload(_) => ErrorKind::ProtocolViolation,
            Transport(_) | ContentIo(_) => ErrorKind::TransportError,
            Contract(_) => ErrorKind::ContractViolation,
            IdleTimeout => ErrorKind::Timeout,
        }
    }
    /// Whether an error page may be sent for this error
    pub fn has_error_page(&self) -> bool {
        match self.kind() {
            ErrorKind::ProtocolViolation | ErrorKind::ResourceExhaustion => {
                !matches!(*self, RequestError::PrematureEndOfStream)
            }
            _ => false,
        }
    }
}

/// A trait which represents an error which can be formatted as HTTP error page
pub trait HttpError {
    /// Return HTTP status code and status text
    ///
    /// The status text and code are also printed on the error page itself
    fn http_status(&self) -> (u16, &'static str);
}

impl HttpError for RequestError {
    fn http_status(&self) -> (u16, &'static str) {
        use self::RequestError::*;
        let code = match *self {
            HeadersAreTooLarge => 431,
            BadHeaders(httparse::Error::TooManyHeaders) => 431,
            BadHeaders(httparse::Error::Version) => 505,
            Upload(UploadError::TooLarge) => 413,
            Upload(UploadError::FieldHeadTooLarge) => 413,
            Upload(UploadError::UnsupportedMediaType(_)) => 415,
            Upload(UploadError::Contract(_)) => 500,
            IdleTimeout => 408,
            Transport(_) | ContentIo(_) | Contract(_) => 500,
            // This one almost never reaches the destination
            PrematureEndOfStream => 400,
            _ => 400,
        };
        (code, status::reason(code))
    }
}
