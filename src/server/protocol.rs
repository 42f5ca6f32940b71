use std::fmt;

use crate::response::Response;
use crate::upload::Upload;

use super::connection::ConnectionHandle;
use super::error::{RequestError, HttpError};
use super::request::Head;


/// The verdict of a handler for a request
pub enum Action {
    /// Send this response
    ///
    /// If the request has a body which was not read, the connection is
    /// closed after the response.
    Respond(Response),
    /// Read the request body (sends `100 Continue` if the client asks)
    Upload(Upload),
    /// Stop processing until `ConnectionHandle::resume()` is called
    ///
    /// The handler is called again with the same request after resume.
    Suspend,
    /// Close the connection, nothing is sent
    Abort,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Action::Respond(ref r) => f.debug_tuple("Respond").field(r).finish(),
            Action::Upload(ref u) => f.debug_tuple("Upload").field(u).finish(),
            Action::Suspend => f.write_str("Suspend"),
            Action::Abort => f.write_str("Abort"),
        }
    }
}

/// A handler of server-side HTTP
///
/// Called from whatever thread drives the connection, so it must be
/// `Send + Sync`. Any closure `Fn(&Head, &ConnectionHandle) -> Action`
/// is a handler too.
pub trait Handler: Send + Sync {
    /// Encountered when headers received
    ///
    /// Note that `head` is only borrowed for the duration of the call. If
    /// you need it later it's your responsibility to clone it.
    fn request(&self, head: &Head, conn: &ConnectionHandle) -> Action;

    /// Builds the page for a request which can't be processed
    ///
    /// The status code of the response is used as is, the connection is
    /// always closed afterwards.
    fn error_page(&self, err: &RequestError) -> Response {
        let (code, reason) = err.http_status();
        let resp = Response::from_buffer(code,
            format!("{} {}\r\n", code, reason).into_bytes());
        // the name and value are known to be valid
        let _ = resp.add_header("Content-Type", "text/plain");
        resp
    }
}

impl<F> Handler for F
    where F: Fn(&Head, &ConnectionHandle) -> Action + Send + Sync
{
    fn request(&self, head: &Head, conn: &ConnectionHandle) -> Action {
        (self)(head, conn)
    }
}
