//! Serialization of a response onto the wire
//!
//! The writer decides framing once, when the head is written, and then
//! pulls content in pieces of at most `Config::write_chunk` bytes.
use std::sync::Arc;

use chrono::Utc;

use crate::response::{Response, Frozen, Produce};
use crate::status;
use crate::version::Version;
use super::context::Config;
use super::error::RequestError;


/// What the writer needs to know about the request being answered
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestInfo {
    pub version: Version,
    pub is_head: bool,
    /// Client allows persistent connection
    pub keep_alive: bool,
    /// Client sent `Connection: keep-alive`
    pub asks_keep_alive: bool,
    /// Some request body bytes will never be read
    pub unread_body: bool,
}

impl RequestInfo {
    /// Used for error pages when the request head is unknown
    pub(crate) fn unknown() -> RequestInfo {
        RequestInfo {
            version: Version::Http11,
            is_head: false,
            keep_alive: false,
            asks_keep_alive: false,
            unread_body: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    /// Bytes left
    Fixed(u64),
    Chunked,
    UntilClose,
}

/// Result of `ResponseWriter::fill`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    /// Some bytes were queued, more content follows
    More,
    /// The whole response is queued
    Done,
    /// Content source asked to drop the connection
    Abort,
}

pub(crate) struct ResponseWriter {
    response: Response,
    framing: Framing,
    /// Content bytes accepted so far
    pos: u64,
    close: bool,
    done: bool,
    scratch: Vec<u8>,
}

/// Formats the current time as IMF-fixdate
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl ResponseWriter {
    /// Writes status line and headers of `response` into `out`
    pub(crate) fn start(response: Response, frozen: &Arc<Frozen>,
                        req: &RequestInfo, config: &Config, out: &mut Vec<u8>)
        -> ResponseWriter
    {
        let opt = frozen.options;
        let code = response.status();
        let size = response.content_length();
        let chunk_allowed = req.version.supports_chunked()
            && !opt.http10_compatible_strict && !opt.http10_server;
        let body_allowed = status::allows_body(code)
            && !req.is_head && !opt.head_only;

        let mut close = opt.connection_close || !req.keep_alive
            || !config.keep_alive || opt.http10_compatible_strict
            || req.unread_body
            || (opt.http10_server && !req.asks_keep_alive);
        let framing = if !body_allowed {
            Framing::Empty
        } else if opt.chunked_encoding && chunk_allowed
            && !frozen.custom_length
        {
            Framing::Chunked
        } else if let Some(size) = size {
            Framing::Fixed(size)
        } else if chunk_allowed && !frozen.custom_length {
            Framing::Chunked
        } else {
            Framing::UntilClose
        };
        if framing == Framing::UntilClose
            || (frozen.custom_length && framing != Framing::Empty)
        {
            close = true;
        }

        let version = if opt.http10_server { "HTTP/1.0" } else { "HTTP/1.1" };
        out.extend_from_slice(format!("{} {} {}\r\n",
            version, code, status::reason(code)).as_bytes());
        if config.date_header && !frozen.has_date {
            out.extend_from_slice(
                format!("Date: {}\r\n", http_date()).as_bytes());
        }
        for &(ref name, ref value) in &frozen.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        match framing {
            Framing::Chunked => {
                out.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
            }
            Framing::Fixed(size) if !frozen.custom_length => {
                out.extend_from_slice(
                    format!("Content-Length: {}\r\n", size).as_bytes());
            }
            // HEAD gets the length the body would have
            Framing::Empty if !frozen.custom_length
                && status::allows_body(code) && code != 304 =>
            {
                if let Some(size) = size {
                    out.extend_from_slice(
                        format!("Content-Length: {}\r\n", size).as_bytes());
                }
            }
            _ => {}
        }
        if close {
            out.extend_from_slice(b"Connection: close\r\n");
        } else if req.version == Version::Http10 || opt.http10_server {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        out.extend_from_slice(b"\r\n");
        debug!("Response {} {:?} close: {}", code, framing, close);

        ResponseWriter {
            response,
            framing,
            pos: 0,
            close,
            done: false,
            scratch: Vec::new(),
        }
    }
    /// Whether the connection must be closed after this response
    pub(crate) fn will_close(&self) -> bool {
        self.close
    }
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
    /// Number of content bytes accepted from the content source
    pub(crate) fn position(&self) -> u64 {
        self.pos
    }
    fn produce(&mut self, max: usize) -> Result<Produce, RequestError> {
        self.scratch.resize(max, 0);
        let result = self.response.content().read(self.pos, &mut self.scratch)
            .map_err(RequestError::ContentIo)?;
        match result {
            Produce::Continue(n) if n == 0 || n > max => {
                Err(RequestError::Contract(
                    "content reader returned invalid byte count"))
            }
            Produce::Continue(n) => {
                self.pos += n as u64;
                Ok(Produce::Continue(n))
            }
            other => Ok(other),
        }
    }
    /// Queues next piece of content of at most `max` bytes into `out`
    pub(crate) fn fill(&mut self, out: &mut Vec<u8>, max: usize)
        -> Result<Fill, RequestError>
    {
        if self.done {
            return Ok(Fill::Done);
        }
        match self.framing {
            Framing::Empty | Framing::Fixed(0) => {
                self.done = true;
                Ok(Fill::Done)
            }
            Framing::Fixed(left) => {
                let max = (max as u64).min(left) as usize;
                match self.produce(max)? {
                    Produce::Continue(n) => {
                        out.extend_from_slice(&self.scratch[..n]);
                        self.framing = Framing::Fixed(left - n as u64);
                        if left == n as u64 {
                            self.done = true;
                            Ok(Fill::Done)
                        } else {
                            Ok(Fill::More)
                        }
                    }
                    Produce::Finished => Err(RequestError::Contract(
                        "content finished before declared length")),
                    Produce::Abort => Ok(Fill::Abort),
                }
            }
            Framing::Chunked => {
                match self.produce(max)? {
                    Produce::Continue(n) => {
                        out.extend_from_slice(
                            format!("{:x}\r\n", n).as_bytes());
                        out.extend_from_slice(&self.scratch[..n]);
                        out.extend_from_slice(b"\r\n");
                        Ok(Fill::More)
                    }
                    Produce::Finished => {
                        out.extend_from_slice(b"0\r\n\r\n");
                        self.done = true;
                        Ok(Fill::Done)
                    }
                    Produce::Abort => Ok(Fill::Abort),
                }
            }
            Framing::UntilClose => {
                match self.produce(max)? {
                    Produce::Continue(n) => {
                        out.extend_from_slice(&self.scratch[..n]);
                        Ok(Fill::More)
                    }
                    Produce::Finished => {
                        self.done = true;
                        Ok(Fill::Done)
                    }
                    Produce::Abort => Ok(Fill::Abort),
                }
            }
        }
    }
}
