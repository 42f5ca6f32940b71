use std::net::SocketAddr;
use std::str::from_utf8;

use crate::headers;
use crate::version::Version;
use super::body::BodyKind;


/// A request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
/// Request headers
///
/// The head is owned by the connection for the whole request, so it
/// survives suspending the request.
pub struct Head {
    /// The client IP and port. If the connection is not using a standard
    /// TCP-IP connection this field will be `None`.
    pub client: Option<SocketAddr>,
    /// The HTTP protocol version.
    pub version: Version,
    /// The HTTP method. It is restricted to token chars.
    pub method: String,
    /// The request target as sent by the client (path and query)
    pub target: String,
    /// HTTP headers in the order they were received
    pub headers: Vec<Header>,
    /// The body kind is either fixed or chunked.
    pub body_kind: BodyKind,
}

impl Head {
    /// The target without the query string
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(idx) => &self.target[..idx],
            None => &self.target,
        }
    }
    /// The query string without leading `?`
    pub fn query(&self) -> Option<&str> {
        self.target.find('?').map(|idx| &self.target[idx+1..])
    }
    /// Value of the first header named `name` (case insensitive)
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value[..])
    }
    /// Value of the first header named `name` if it is valid utf-8
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(|v| from_utf8(v).ok())
    }
    /// Values of all headers named `name`
    pub fn all_headers<'x>(&'x self, name: &'x str)
        -> impl Iterator<Item=&'x [u8]> + 'x
    {
        self.headers.iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value[..])
    }
    /// Declared size of the request body, `None` for chunked requests
    pub fn upload_size(&self) -> Option<u64> {
        match self.body_kind {
            BodyKind::Fixed(n) => Some(n),
            BodyKind::Chunked => None,
        }
    }
    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
    pub fn content_type(&self) -> Option<&str> {
        self.headers.iter()
            .find(|h| headers::is_content_type(&h.name))
            .and_then(|h| from_utf8(&h.value).ok())
    }
    fn connection_token(&self, check: fn(&[u8]) -> bool) -> bool {
        self.headers.iter()
            .filter(|h| headers::is_connection(&h.name))
            .any(|h| h.value.split(|&x| x == b',').any(check))
    }
    /// Whether the client explicitly asked for a persistent connection
    pub fn asks_keep_alive(&self) -> bool {
        self.connection_token(headers::is_keep_alive)
    }
    /// Whether the client allows the connection to stay open
    pub fn wants_keep_alive(&self) -> bool {
        let close = self.connection_token(headers::is_close);
        match self.version {
            _ if close => false,
            Version::Http11 => true,
            Version::Http10 => self.asks_keep_alive(),
        }
    }
    /// Whether the client waits for `100 Continue` before the body
    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11 && self.headers.iter()
            .filter(|h| headers::is_expect(&h.name))
            .any(|h| headers::is_continue(&h.value))
    }
}

#[cfg(test)]
mod test {
    use super::{Head, Header};
    use crate::server::body::BodyKind;
    use crate::version::Version;

    fn head(version: Version, target: &str, headers: &[(&str, &str)])
        -> Head
    {
        Head {
            client: None,
            version,
            method: "GET".into(),
            target: target.into(),
            headers: headers.iter().map(|&(n, v)| Header {
                name: n.into(),
                value: v.as_bytes().to_vec(),
            }).collect(),
            body_kind: BodyKind::Fixed(0),
        }
    }

    #[test]
    fn target() {
        let h = head(Version::Http11, "/a/b?x=1&y", &[]);
        assert_eq!(h.path(), "/a/b");
        assert_eq!(h.query(), Some("x=1&y"));
        let h = head(Version::Http11, "/", &[]);
        assert_eq!(h.path(), "/");
        assert_eq!(h.query(), None);
        assert_eq!(h.upload_size(), Some(0));
    }

    #[test]
    fn lookup() {
        let h = head(Version::Http11, "/", &[
            ("Host", "example.com"),
            ("X-Tag", "a"),
            ("x-tag", "b"),
            ("Content-Type", "text/plain"),
        ]);
        assert_eq!(h.header_str("host"), Some("example.com"));
        assert_eq!(h.all_headers("X-TAG").collect::<Vec<_>>(),
                   vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(h.content_type(), Some("text/plain"));
        assert_eq!(h.header("missing"), None);
        // the value outlives the name it was looked up by
        let value = {
            let name = String::from("HOST");
            h.header(&name)
        };
        assert_eq!(value, Some(&b"example.com"[..]));
    }

    #[test]
    fn keep_alive() {
        assert!(head(Version::Http11, "/", &[]).wants_keep_alive());
        assert!(!head(Version::Http11, "/", &[("Connection", "Close")])
                .wants_keep_alive());
        assert!(!head(Version::Http10, "/", &[]).wants_keep_alive());
        assert!(head(Version::Http10, "/", &[("connection", "keep-alive")])
                .wants_keep_alive());
    }

    #[test]
    fn expect() {
        let h = head(Version::Http11, "/", &[("Expect", "100-continue")]);
        assert!(h.expects_continue());
        let h = head(Version::Http10, "/", &[("Expect", "100-continue")]);
        assert!(!h.expects_continue());
    }
}
