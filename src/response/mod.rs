//! Response and its content sources
//!
//! `Response` is a cheap handle to shared state. The application builds it,
//! adjusts headers and options, and hands it to the engine with
//! `Action::Respond`. At that moment the response is finalized: headers and
//! options are frozen and any further modification fails with
//! `OptionError::TooLate`.
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::headers;

pub mod options;

pub use self::options::{ResponseOption, OptionError, Options};
pub use self::options::TerminationCallback;
use self::options::Applied;


/// Result of a single `ContentReader::read` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produce {
    /// This many bytes were put at the start of the buffer (must be > 0)
    Continue(usize),
    /// No more content
    Finished,
    /// Stop and close the connection
    Abort,
}

/// Pull interface of lazily produced content
///
/// `pos` is the number of bytes accepted so far for the current delivery
/// of the response.
pub trait ContentReader: Send {
    fn read(&mut self, pos: u64, buf: &mut [u8]) -> Produce;
}

impl<F> ContentReader for F
    where F: FnMut(u64, &mut [u8]) -> Produce + Send
{
    fn read(&mut self, pos: u64, buf: &mut [u8]) -> Produce {
        (self)(pos, buf)
    }
}

pub(crate) enum Content {
    Buffer(Cow<'static, [u8]>),
    File {
        file: Mutex<File>,
        offset: u64,
        length: u64,
    },
    Callback {
        size: Option<u64>,
        reader: Mutex<Box<dyn ContentReader>>,
    },
}

impl Content {
    pub fn size(&self) -> Option<u64> {
        match *self {
            Content::Buffer(ref data) => Some(data.len() as u64),
            Content::File { length, .. } => Some(length),
            Content::Callback { size, .. } => size,
        }
    }
    /// Produces content at `pos` into `buf`
    ///
    /// File regions report `Finished` only at the end of the region, an
    /// early end of file is an `io::Error`.
    pub fn read(&self, pos: u64, buf: &mut [u8]) -> io::Result<Produce> {
        match *self {
            Content::Buffer(ref data) => {
                let pos = pos.min(data.len() as u64) as usize;
                let n = (data.len() - pos).min(buf.len());
                if n == 0 {
                    return Ok(Produce::Finished);
                }
                buf[..n].copy_from_slice(&data[pos..pos+n]);
                Ok(Produce::Continue(n))
            }
            Content::File { ref file, offset, length } => {
                if pos >= length {
                    return Ok(Produce::Finished);
                }
                let n = (length - pos).min(buf.len() as u64) as usize;
                let mut file = lock(file);
                file.seek(SeekFrom::Start(offset + pos))?;
                let got = file.read(&mut buf[..n])?;
                if got == 0 {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                        "file is shorter than response length"));
                }
                Ok(Produce::Continue(got))
            }
            Content::Callback { ref reader, .. } => {
                Ok(lock(reader).read(pos, buf))
            }
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Content::Buffer(ref data) => write!(f, "Buffer({})", data.len()),
            Content::File { offset, length, .. } => {
                write!(f, "File({}+{})", offset, length)
            }
            Content::Callback { size, .. } => write!(f, "Callback({:?})", size),
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Headers and options of a response accepted for transmission
#[derive(Debug)]
pub(crate) struct Frozen {
    pub headers: Vec<(String, String)>,
    pub options: Options,
    /// An application `Content-Length` is kept in `headers` verbatim
    pub custom_length: bool,
    pub has_date: bool,
}

#[derive(Debug, Default)]
struct Draft {
    headers: Vec<(String, String)>,
    options: Options,
}

#[derive(Debug)]
enum State {
    Open(Draft),
    Finalized(Arc<Frozen>),
    /// Transitional, only seen while finalizing
    Void,
}

/// Response was attached a second time without being reusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlreadyUsed;

struct Inner {
    status: u16,
    content: Content,
    state: Mutex<State>,
    termination: Mutex<Option<TerminationCallback>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let callback = self.termination.get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// A response to a request
///
/// Clones share the same response.
#[derive(Clone)]
pub struct Response(Arc<Inner>);

impl Response {
    fn new(status: u16, content: Content) -> Response {
        Response(Arc::new(Inner {
            status,
            content,
            state: Mutex::new(State::Open(Draft::default())),
            termination: Mutex::new(None),
        }))
    }
    /// Response with a body held in memory
    pub fn from_buffer<B>(status: u16, data: B) -> Response
        where B: Into<Cow<'static, [u8]>>
    {
        Response::new(status, Content::Buffer(data.into()))
    }
    /// Response without a body
    pub fn empty(status: u16) -> Response {
        Response::from_buffer(status, &b""[..])
    }
    /// Response streaming `length` bytes of `file` starting at `offset`
    pub fn from_file(status: u16, file: File, offset: u64, length: u64)
        -> Response
    {
        Response::new(status, Content::File {
            file: Mutex::new(file),
            offset,
            length,
        })
    }
    /// Response produced by a callback
    ///
    /// With `size` set, the callback must produce exactly that many bytes.
    /// Otherwise the body is sent chunked, or delimited by connection close
    /// for clients which can't do chunked encoding.
    pub fn from_callback<R>(status: u16, size: Option<u64>, reader: R)
        -> Response
        where R: ContentReader + 'static
    {
        Response::new(status, Content::Callback {
            size,
            reader: Mutex::new(Box::new(reader)),
        })
    }
    pub fn status(&self) -> u16 {
        self.0.status
    }
    /// Length of the content if known in advance
    pub fn content_length(&self) -> Option<u64> {
        self.0.content.size()
    }
    pub fn is_finalized(&self) -> bool {
        matches!(*lock(&self.0.state), State::Finalized(_))
    }
    /// Appends a header, duplicates are allowed
    pub fn add_header<N, V>(&self, name: N, value: V)
        -> Result<(), OptionError>
        where N: Into<String>, V: Into<String>
    {
        let (name, value) = (name.into(), value.into());
        match *lock(&self.0.state) {
            State::Open(ref mut draft) => {
                if !headers::is_token(&name) || !headers::is_safe_value(&value)
                {
                    return Err(OptionError::BadHeader);
                }
                draft.headers.push((name, value));
                Ok(())
            }
            _ => Err(OptionError::TooLate),
        }
    }
    /// Applies options in order
    ///
    /// Stops successfully at `ResponseOption::End`. An unknown option fails
    /// the call, options listed before it stay applied.
    pub fn set_options<I>(&self, options: I) -> Result<(), OptionError>
        where I: IntoIterator<Item=ResponseOption>
    {
        let mut state = lock(&self.0.state);
        let draft = match *state {
            State::Open(ref mut draft) => draft,
            _ => return Err(OptionError::TooLate),
        };
        for option in options {
            match draft.options.apply(option)? {
                Applied::Next => {}
                Applied::Stop => break,
                Applied::Callback(cb) => {
                    *lock(&self.0.termination) = cb;
                }
            }
        }
        Ok(())
    }
    /// Current options, frozen ones after finalization
    pub fn options(&self) -> Options {
        match *lock(&self.0.state) {
            State::Open(ref draft) => draft.options,
            State::Finalized(ref frozen) => frozen.options,
            State::Void => Options::default(),
        }
    }

    /// Freezes headers and options for transmission
    ///
    /// A reusable response returns the same frozen data on every call.
    pub(crate) fn finalize(&self) -> Result<Arc<Frozen>, AlreadyUsed> {
        let mut state = lock(&self.0.state);
        match mem::replace(&mut *state, State::Void) {
            State::Open(draft) => {
                let frozen = Arc::new(freeze(draft));
                *state = State::Finalized(frozen.clone());
                Ok(frozen)
            }
            State::Finalized(frozen) => {
                let reusable = frozen.options.reusable;
                *state = State::Finalized(frozen.clone());
                if reusable {
                    Ok(frozen)
                } else {
                    Err(AlreadyUsed)
                }
            }
            State::Void => Err(AlreadyUsed),
        }
    }
    pub(crate) fn content(&self) -> &Content {
        &self.0.content
    }
}

fn freeze(draft: Draft) -> Frozen {
    let Draft { headers: list, mut options } = draft;
    let mut kept = Vec::with_capacity(list.len());
    let mut custom_length = false;
    let mut has_date = false;
    for (name, value) in list {
        if headers::is_content_length(&name) {
            if options.insanity_header_content_length && !custom_length {
                custom_length = true;
                kept.push((name, value));
            } else {
                warn!("Dropping application header {}: {:?}", name, value);
            }
            continue;
        }
        if headers::is_transfer_encoding(&name) {
            warn!("Dropping application header {}: {:?}", name, value);
            continue;
        }
        if headers::is_connection(&name) {
            if headers::has_token(value.as_bytes(), "close") {
                options.connection_close = true;
            }
            // framing related tokens are emitted by the writer
            continue;
        }
        if headers::is_date(&name) {
            has_date = true;
        }
        kept.push((name, value));
    }
    Frozen { headers: kept, options, custom_length, has_date }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.0.status)
            .field("content", &self.0.content)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{Response, ResponseOption, OptionError, Produce, AlreadyUsed};
    use super::ResponseOption::*;

    #[test]
    fn too_late() {
        let resp = Response::from_buffer(200, &b"hello"[..]);
        resp.add_header("X-Before", "1").unwrap();
        resp.set_options(vec![HeadOnly(true), End]).unwrap();
        assert!(!resp.is_finalized());
        let frozen = resp.finalize().unwrap();
        assert!(frozen.options.head_only);
        assert!(resp.is_finalized());
        assert_eq!(resp.add_header("X-After", "2"), Err(OptionError::TooLate));
        assert_eq!(resp.set_options(vec![End]), Err(OptionError::TooLate));
        // no entries are looked at
        assert_eq!(resp.set_options(vec![Unknown(5)]),
                   Err(OptionError::TooLate));
    }

    #[test]
    fn unknown_stops_processing() {
        let resp = Response::empty(204);
        let res = resp.set_options(vec![
            ConnectionClose(true),
            ResponseOption::from_code(77, true),
            HeadOnly(true),
            End,
        ]);
        assert_eq!(res, Err(OptionError::Unknown(77)));
        let opt = resp.options();
        assert!(opt.connection_close);
        assert!(!opt.head_only);
    }

    #[test]
    fn end_stops_processing() {
        let resp = Response::empty(200);
        resp.set_options(vec![End, Unknown(1), HeadOnly(true)]).unwrap();
        assert!(!resp.options().head_only);
    }

    #[test]
    fn bad_headers() {
        let resp = Response::empty(200);
        assert_eq!(resp.add_header("Bad Name", "x"),
                   Err(OptionError::BadHeader));
        assert_eq!(resp.add_header("X-Evil", "a\r\nb"),
                   Err(OptionError::BadHeader));
    }

    #[test]
    fn framing_headers_dropped() {
        let resp = Response::from_buffer(200, &b"abc"[..]);
        resp.add_header("Content-Length", "100").unwrap();
        resp.add_header("Transfer-Encoding", "chunked").unwrap();
        resp.add_header("Connection", "close").unwrap();
        resp.add_header("Date", "today").unwrap();
        resp.add_header("X-Dup", "1").unwrap();
        resp.add_header("X-Dup", "2").unwrap();
        let frozen = resp.finalize().unwrap();
        assert!(frozen.options.connection_close);
        assert!(!frozen.custom_length);
        assert!(frozen.has_date);
        let names = frozen.headers.iter()
            .map(|&(ref n, ref v)| format!("{}={}", n, v))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Date=today", "X-Dup=1", "X-Dup=2"]);
    }

    #[test]
    fn insane_content_length() {
        let resp = Response::from_buffer(200, &b"abc"[..]);
        resp.set_options(vec![InsanityHeaderContentLength(true)]).unwrap();
        resp.add_header("Content-Length", "100").unwrap();
        let frozen = resp.finalize().unwrap();
        assert!(frozen.custom_length);
        assert_eq!(frozen.headers,
                   vec![("Content-Length".to_string(), "100".to_string())]);
    }

    #[test]
    fn reuse() {
        let once = Response::empty(200);
        once.finalize().unwrap();
        assert_eq!(once.finalize().err(), Some(AlreadyUsed));

        let many = Response::empty(200);
        many.set_options(vec![Reusable(true)]).unwrap();
        let a = many.finalize().unwrap();
        let b = many.clone().finalize().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn termination_callback_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cnt = counter.clone();
        let resp = Response::empty(200);
        resp.set_options(vec![TerminationCallback(Some(Box::new(move || {
            cnt.fetch_add(1, Ordering::SeqCst);
        })))]).unwrap();
        let clone = resp.clone();
        drop(resp);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        clone.finalize().unwrap();
        drop(clone);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn termination_callback_cleared() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cnt = counter.clone();
        let resp = Response::empty(200);
        resp.set_options(vec![
            TerminationCallback(Some(Box::new(move || {
                cnt.fetch_add(1, Ordering::SeqCst);
            }))),
            ResponseOption::from_code(8, false),
        ]).unwrap();
        drop(resp);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn buffer_content() {
        let resp = Response::from_buffer(200, b"hello".to_vec());
        assert_eq!(resp.content_length(), Some(5));
        let mut buf = [0u8; 3];
        assert_eq!(resp.content().read(0, &mut buf).unwrap(),
                   Produce::Continue(3));
        assert_eq!(&buf, b"hel");
        assert_eq!(resp.content().read(3, &mut buf).unwrap(),
                   Produce::Continue(2));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(resp.content().read(5, &mut buf).unwrap(),
                   Produce::Finished);
    }

    #[test]
    fn callback_content() {
        let resp = Response::from_callback(200, None,
            |pos: u64, buf: &mut [u8]| {
                if pos < 4 {
                    buf[0] = b'a' + pos as u8;
                    Produce::Continue(1)
                } else {
                    Produce::Finished
                }
            });
        assert_eq!(resp.content_length(), None);
        let mut buf = [0u8; 8];
        let mut out = Vec::new();
        let mut pos = 0;
        while let Produce::Continue(n) = resp.content().read(pos, &mut buf)
            .unwrap()
        {
            out.extend_from_slice(&buf[..n]);
            pos += n as u64;
        }
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn file_content() {
        let path = std::env::temp_dir()
            .join(format!("spindle-file-content-{}", std::process::id()));
        std::fs::File::create(&path).unwrap()
            .write_all(b"0123456789").unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let resp = Response::from_file(200, file, 2, 5);
        assert_eq!(resp.content_length(), Some(5));
        let mut buf = [0u8; 16];
        assert_eq!(resp.content().read(0, &mut buf).unwrap(),
                   Produce::Continue(5));
        assert_eq!(&buf[..5], b"23456");
        assert_eq!(resp.content().read(5, &mut buf).unwrap(),
                   Produce::Finished);

        let short = Response::from_file(200,
            std::fs::File::open(&path).unwrap(), 8, 5);
        assert_eq!(short.content().read(0, &mut buf).unwrap(),
                   Produce::Continue(2));
        assert!(short.content().read(2, &mut buf).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
