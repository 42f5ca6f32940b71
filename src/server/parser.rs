use std::net::SocketAddr;

use httparse;

use crate::version::Version;
use super::MAX_HEADERS_NUM;
use super::body::BodyKind;
use super::error::RequestError;
use super::request::{Head, Header};


/// Parses request line and headers at the start of `buf`
///
/// Returns `None` if the head is not complete yet, otherwise the head and
/// the number of bytes it occupies. Empty lines before the request line
/// are skipped.
pub fn parse_head(buf: &[u8], client: Option<SocketAddr>)
    -> Result<Option<(Head, usize)>, RequestError>
{
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_NUM];
    let mut raw = httparse::Request::new(&mut headers);
    let bytes = match raw.parse(buf)? {
        httparse::Status::Complete(bytes) => bytes,
        httparse::Status::Partial => return Ok(None),
    };
    // httparse fills all three on a complete parse
    let (method, target, minor) = match (raw.method, raw.path, raw.version) {
        (Some(m), Some(p), Some(v)) => (m, p, v),
        _ => return Err(RequestError::BadHeaders(httparse::Error::Token)),
    };
    let body_kind = BodyKind::parse(&raw.headers[..])?;
    let head = Head {
        client,
        version: Version::from_minor(minor),
        method: method.to_string(),
        target: target.to_string(),
        headers: raw.headers.iter().map(|h| Header {
            name: h.name.to_string(),
            value: h.value.to_vec(),
        }).collect(),
        body_kind,
    };
    Ok(Some((head, bytes)))
}
