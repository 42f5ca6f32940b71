use std::str::from_utf8;

use httparse;

use crate::headers;
use super::{MAX_CHUNK_HEAD, MAX_HEADERS_SIZE};
use super::error::RequestError;


/// Framing of the request body
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    /// Content-Length, or zero if the request has neither framing header
    Fixed(u64),
    Chunked,
}

impl BodyKind {
    pub fn parse(headers: &[httparse::Header]) -> Result<BodyKind, RequestError>
    {
        use self::RequestError::*;
        let mut length = None;
        let mut chunked = false;
        for header in headers {
            if headers::is_content_length(header.name) {
                let value = from_utf8(header.value)?.trim();
                if value.is_empty() ||
                    !value.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(BadContentLength);
                }
                let value: u64 = value.parse().map_err(|_| BadContentLength)?;
                match length {
                    Some(old) if old != value => {
                        return Err(DuplicateContentLength);
                    }
                    _ => length = Some(value),
                }
            } else if headers::is_transfer_encoding(header.name) {
                for item in header.value.split(|&x| x == b',') {
                    if headers::token_eq(item, "") {
                        continue;
                    }
                    // chunked must be the one and only coding
                    if chunked || !headers::is_chunked(item) {
                        return Err(UnsupportedTransferEncoding);
                    }
                    chunked = true;
                }
            }
        }
        match (length, chunked) {
            (Some(_), true) => Err(ConflictingFraming),
            (Some(x), false) => Ok(BodyKind::Fixed(x)),
            (None, true) => Ok(BodyKind::Chunked),
            (None, false) => Ok(BodyKind::Fixed(0)),
        }
    }
}

/// Where the body decoder is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyProgress {
    /// Fixed-size body (bytes left)
    Fixed(u64),
    /// Waiting for a chunk size line
    ChunkSize,
    /// Inside of a chunk (bytes left)
    ChunkData(u64),
    /// Waiting for CRLF after chunk data
    ChunkEnd,
    /// Skipping trailer lines until the empty one
    Trailers,
    Done,
}

/// What to do with the input buffer next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStep {
    /// That many bytes at the start of input are body data
    Data(usize),
    /// That many bytes are framing and must be dropped
    Skip(usize),
    NeedMore,
    Done,
}

impl BodyProgress {
    pub fn new(kind: BodyKind) -> BodyProgress {
        match kind {
            BodyKind::Fixed(0) => BodyProgress::Done,
            BodyKind::Fixed(x) => BodyProgress::Fixed(x),
            BodyKind::Chunked => BodyProgress::ChunkSize,
        }
    }
    pub fn is_done(&self) -> bool {
        *self == BodyProgress::Done
    }
    /// Decides about the start of `input`
    ///
    /// The state is advanced as if the caller consumes the bytes returned
    /// in `Data` or `Skip`.
    pub fn next(&mut self, input: &[u8]) -> Result<BodyStep, RequestError> {
        use self::BodyProgress::*;
        let step = match *self {
            Done => return Ok(BodyStep::Done),
            _ if input.is_empty() => return Ok(BodyStep::NeedMore),
            Fixed(left) => {
                let n = left.min(input.len() as u64);
                *self = if n == left { Done } else { Fixed(left - n) };
                BodyStep::Data(n as usize)
            }
            ChunkData(left) => {
                let n = left.min(input.len() as u64);
                *self = if n == left { ChunkEnd } else { ChunkData(left - n) };
                BodyStep::Data(n as usize)
            }
            ChunkSize => {
                match httparse::parse_chunk_size(input) {
                    Ok(httparse::Status::Complete((bytes, 0))) => {
                        *self = Trailers;
                        BodyStep::Skip(bytes)
                    }
                    Ok(httparse::Status::Complete((bytes, size))) => {
                        *self = ChunkData(size);
                        BodyStep::Skip(bytes)
                    }
                    Ok(httparse::Status::Partial)
                    if input.len() <= MAX_CHUNK_HEAD
                    => BodyStep::NeedMore,
                    Ok(httparse::Status::Partial) | Err(_) => {
                        return Err(RequestError::InvalidChunkSize);
                    }
                }
            }
            ChunkEnd => {
                if input[0] != b'\r' || input.get(1).map_or(false, |&c| c != b'\n')
                {
                    return Err(RequestError::BadChunkFraming);
                }
                if input.len() < 2 {
                    return Ok(BodyStep::NeedMore);
                }
                *self = ChunkSize;
                BodyStep::Skip(2)
            }
            Trailers => {
                match input.iter().position(|&c| c == b'\n') {
                    Some(end) => {
                        if end == 0 || (end == 1 && input[0] == b'\r') {
                            *self = Done;
                        }
                        BodyStep::Skip(end+1)
                    }
                    None if input.len() > MAX_HEADERS_SIZE => {
                        return Err(RequestError::BadChunkFraming);
                    }
                    None => BodyStep::NeedMore,
                }
            }
        };
        Ok(step)
    }
}

#[cfg(test)]
mod test {
    use httparse::Header;

    use super::{BodyKind, BodyProgress, BodyStep};
    use crate::server::error::RequestError;

    fn parse(headers: &[(&str, &str)]) -> Result<BodyKind, RequestError> {
        let headers = headers.iter().map(|&(name, value)| Header {
            name,
            value: value.as_bytes(),
        }).collect::<Vec<_>>();
        BodyKind::parse(&headers)
    }

    // Feeds the whole input and returns decoded body
    fn decode(kind: BodyKind, input: &[u8])
        -> Result<(Vec<u8>, usize), RequestError>
    {
        let mut progress = BodyProgress::new(kind);
        let mut pos = 0;
        let mut body = Vec::new();
        loop {
            match progress.next(&input[pos..])? {
                BodyStep::Data(n) => {
                    body.extend_from_slice(&input[pos..pos+n]);
                    pos += n;
                }
                BodyStep::Skip(n) => pos += n,
                BodyStep::NeedMore | BodyStep::Done => {
                    assert!(progress.is_done());
                    return Ok((body, pos));
                }
            }
        }
    }

    #[test]
    fn kinds() {
        assert_eq!(parse(&[]).unwrap(), BodyKind::Fixed(0));
        assert_eq!(parse(&[("Content-Length", " 12 ")]).unwrap(),
                   BodyKind::Fixed(12));
        assert_eq!(parse(&[("content-length", "5"), ("Content-Length", "5")])
                   .unwrap(), BodyKind::Fixed(5));
        assert_eq!(parse(&[("Transfer-Encoding", "Chunked")]).unwrap(),
                   BodyKind::Chunked);
    }

    #[test]
    fn bad_framing() {
        assert!(matches!(parse(&[("Content-Length", "5"),
                                 ("Content-Length", "6")]),
                         Err(RequestError::DuplicateContentLength)));
        assert!(matches!(parse(&[("Content-Length", "+5")]),
                         Err(RequestError::BadContentLength)));
        assert!(matches!(parse(&[("Content-Length", "")]),
                         Err(RequestError::BadContentLength)));
        assert!(matches!(parse(&[("Content-Length", "5"),
                                 ("Transfer-Encoding", "chunked")]),
                         Err(RequestError::ConflictingFraming)));
        assert!(matches!(parse(&[("Transfer-Encoding", "gzip, chunked")]),
                         Err(RequestError::UnsupportedTransferEncoding)));
        assert!(matches!(parse(&[("Transfer-Encoding", "chunked"),
                                 ("Transfer-Encoding", "chunked")]),
                         Err(RequestError::UnsupportedTransferEncoding)));
    }

    #[test]
    fn fixed() {
        let (body, used) = decode(BodyKind::Fixed(5),
                                  b"helloGET / HTTP/1.1").unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(used, 5);
        let mut progress = BodyProgress::new(BodyKind::Fixed(5));
        assert_eq!(progress.next(b"hel").unwrap(), BodyStep::Data(3));
        assert_eq!(progress.next(b"").unwrap(), BodyStep::NeedMore);
        assert_eq!(progress, BodyProgress::Fixed(2));
    }

    #[test]
    fn chunked() {
        let input = b"2\r\nAB\r\n1;ext=1\r\nC\r\n0\r\nX-Trailer: y\r\n\r\nNEXT";
        let (body, used) = decode(BodyKind::Chunked, input).unwrap();
        assert_eq!(body, b"ABC");
        assert_eq!(&input[used..], b"NEXT");
    }

    #[test]
    fn chunked_partial() {
        let mut progress = BodyProgress::new(BodyKind::Chunked);
        assert_eq!(progress.next(b"1").unwrap(), BodyStep::NeedMore);
        assert_eq!(progress.next(b"10\r\n").unwrap(), BodyStep::Skip(4));
        assert_eq!(progress.next(b"abc").unwrap(), BodyStep::Data(3));
        assert_eq!(progress, BodyProgress::ChunkData(13));
    }

    #[test]
    fn chunked_errors() {
        assert!(matches!(decode(BodyKind::Chunked, b"zz\r\n"),
                         Err(RequestError::InvalidChunkSize)));
        assert!(matches!(decode(BodyKind::Chunked, b"2\r\nABC\r\n"),
                         Err(RequestError::BadChunkFraming)));
        let long = vec![b'1'; 200];
        assert!(matches!(decode(BodyKind::Chunked, &long),
                         Err(RequestError::InvalidChunkSize)));
    }
}
