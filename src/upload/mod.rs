//! Request body processing
//!
//! The handler answers `Action::Upload` to receive the request body in one
//! of three ways:
//!
//! * `Upload::full` buffers the whole body and calls a closure once
//! * `Upload::incremental` passes decoded body slices as they arrive
//! * `Upload::post` decodes form fields (url-encoded or multipart)
//!
//! Every callback answers with an `UploadAction`. `Suspend` keeps all the
//! data which was not delivered yet, so resuming continues exactly where
//! processing stopped.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::headers;
use crate::response::Response;

mod urlencoded;
mod multipart;

use self::urlencoded::UrlDecoder;
use self::multipart::MultipartDecoder;


/// Default limit of a field name or of the headers of a multipart part
pub const DEFAULT_MAX_FIELD_HEAD: usize = 8192;

quick_error! {
    /// Error of decoding a request body
    #[derive(Debug)]
    pub enum UploadError {
        /// Body is larger than the limit of `Upload::full`
        TooLarge {
            display("request body is too large")
        }
        FieldHeadTooLarge {
            display("field name or part headers are too large")
        }
        UnsupportedMediaType(media: String) {
            display("unsupported media type {:?}", media)
        }
        Malformed(reason: &'static str) {
            display("malformed request body: {}", reason)
        }
        /// A callback answered something impossible at that point
        Contract(reason: &'static str) {
            display("upload callback contract violated: {}", reason)
        }
    }
}

/// The verdict of an upload callback
pub enum UploadAction {
    Continue,
    Suspend,
    Abort,
    Respond(Response),
}

impl fmt::Debug for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            UploadAction::Continue => f.write_str("Continue"),
            UploadAction::Suspend => f.write_str("Suspend"),
            UploadAction::Abort => f.write_str("Abort"),
            UploadAction::Respond(ref r) => {
                f.debug_tuple("Respond").field(r).finish()
            }
        }
    }
}

/// A form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Value of `Content-Transfer-Encoding` of a multipart part
    pub encoding: Option<String>,
}

impl Field {
    fn named(name: String) -> Field {
        Field { name, filename: None, content_type: None, encoding: None }
    }
}

/// Receiver of decoded body slices
pub trait UploadReader: Send {
    /// Called for each piece of the body, `offset` is its position
    fn chunk(&mut self, data: &[u8], offset: u64) -> UploadAction;
    /// Called after the last piece, `Continue` is not a valid answer
    fn end(&mut self) -> UploadAction;
}

/// Receiver of decoded form fields
pub trait PostReader: Send {
    /// Called for each decoded piece of a field value
    ///
    /// Each field is reported at least once, an empty value as a single
    /// call with empty `data` at offset zero.
    fn field(&mut self, field: &Field, data: &[u8], offset: u64)
        -> UploadAction;
    /// Called when all fields are reported, `Continue` is not valid here
    fn done(&mut self) -> UploadAction;
}

/// Encoding of a form body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostEncoding {
    UrlEncoded,
    Multipart { boundary: String },
}

impl PostEncoding {
    /// Detects encoding from the value of the `Content-Type` header
    pub fn detect(content_type: &str) -> Result<PostEncoding, UploadError> {
        match &headers::media_type(content_type)[..] {
            "application/x-www-form-urlencoded" => Ok(PostEncoding::UrlEncoded),
            "multipart/form-data" => {
                match headers::param(content_type, "boundary") {
                    Some(ref b) if !b.is_empty() && b.len() <= 70 => {
                        Ok(PostEncoding::Multipart { boundary: b.clone() })
                    }
                    _ => Err(UploadError::Malformed(
                        "multipart body without a valid boundary")),
                }
            }
            media => Err(UploadError::UnsupportedMediaType(media.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostOptions {
    pub max_field_head: usize,
    /// Overrides detection from `Content-Type`
    pub encoding: Option<PostEncoding>,
}

impl Default for PostOptions {
    fn default() -> PostOptions {
        PostOptions {
            max_field_head: DEFAULT_MAX_FIELD_HEAD,
            encoding: None,
        }
    }
}

/// Callback of `Upload::full`
pub type FullCallback = Box<dyn FnMut(u64, &[u8]) -> UploadAction + Send>;

/// How the request body should be processed
pub enum Upload {
    Full { limit: usize, callback: FullCallback },
    Incremental(Box<dyn UploadReader>),
    Post(PostOptions, Box<dyn PostReader>),
}

impl Upload {
    /// Buffers up to `limit` bytes, then calls `callback(size, body)`
    pub fn full<F>(limit: usize, callback: F) -> Upload
        where F: FnMut(u64, &[u8]) -> UploadAction + Send + 'static
    {
        Upload::Full { limit, callback: Box::new(callback) }
    }
    pub fn incremental<R: UploadReader + 'static>(reader: R) -> Upload {
        Upload::Incremental(Box::new(reader))
    }
    pub fn post<R: PostReader + 'static>(options: PostOptions, reader: R)
        -> Upload
    {
        Upload::Post(options, Box::new(reader))
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Upload::Full { limit, .. } => write!(f, "Upload::Full({})", limit),
            Upload::Incremental(_) => f.write_str("Upload::Incremental"),
            Upload::Post(ref opt, _) => write!(f, "Upload::Post({:?})", opt),
        }
    }
}

/// A decoded piece of a field value
#[derive(Debug)]
pub(crate) struct Event {
    pub field: Arc<Field>,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug)]
enum Decoder {
    UrlEncoded(UrlDecoder),
    Multipart(MultipartDecoder),
}

/// Turns body bytes into a queue of field events
#[derive(Debug)]
pub(crate) struct PostProcessor {
    decoder: Decoder,
    queue: VecDeque<Event>,
}

impl PostProcessor {
    pub fn new(encoding: &PostEncoding, max_field_head: usize)
        -> PostProcessor
    {
        let decoder = match *encoding {
            PostEncoding::UrlEncoded => {
                Decoder::UrlEncoded(UrlDecoder::new(max_field_head))
            }
            PostEncoding::Multipart { ref boundary } => {
                Decoder::Multipart(
                    MultipartDecoder::new(boundary, max_field_head))
            }
        };
        PostProcessor { decoder, queue: VecDeque::new() }
    }
    pub fn push(&mut self, data: &[u8]) -> Result<(), UploadError> {
        match self.decoder {
            Decoder::UrlEncoded(ref mut d) => d.push(data, &mut self.queue),
            Decoder::Multipart(ref mut d) => d.push(data, &mut self.queue),
        }
    }
    pub fn finish(&mut self) -> Result<(), UploadError> {
        match self.decoder {
            Decoder::UrlEncoded(ref mut d) => d.finish(&mut self.queue),
            Decoder::Multipart(ref mut d) => d.finish(&mut self.queue),
        }
    }
    pub fn front(&self) -> Option<&Event> {
        self.queue.front()
    }
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }
}

/// Outcome of feeding the upload
#[derive(Debug)]
pub(crate) enum Verdict {
    /// Everything was delivered, more input is welcome
    Continue,
    Suspend,
    Abort,
    Respond(Response),
}

fn verdict(action: UploadAction) -> Verdict {
    match action {
        UploadAction::Continue => Verdict::Continue,
        UploadAction::Suspend => Verdict::Suspend,
        UploadAction::Abort => Verdict::Abort,
        UploadAction::Respond(r) => Verdict::Respond(r),
    }
}

fn final_verdict(action: UploadAction, name: &'static str)
    -> Result<Verdict, UploadError>
{
    match action {
        UploadAction::Continue => Err(UploadError::Contract(name)),
        other => Ok(verdict(other)),
    }
}

enum Mode {
    Full { limit: usize, buf: Vec<u8>, callback: FullCallback },
    Incremental { reader: Box<dyn UploadReader>, offset: u64 },
    Post { processor: PostProcessor, reader: Box<dyn PostReader> },
}

/// Upload of a single request in progress
pub(crate) struct UploadState {
    mode: Mode,
    decoder_done: bool,
}

impl UploadState {
    /// Prepares the upload
    ///
    /// `declared` is the `Content-Length` of the request if any and
    /// `content_type` the `Content-Type` header.
    pub fn new(upload: Upload, declared: Option<u64>,
               content_type: Option<&str>)
        -> Result<UploadState, UploadError>
    {
        let mode = match upload {
            Upload::Full { limit, callback } => {
                let initial = match declared {
                    Some(size) if size > limit as u64 => {
                        return Err(UploadError::TooLarge);
                    }
                    Some(size) => size as usize,
                    None => 0,
                };
                Mode::Full { limit, buf: Vec::with_capacity(initial), callback }
            }
            Upload::Incremental(reader) => {
                Mode::Incremental { reader, offset: 0 }
            }
            Upload::Post(options, reader) => {
                let encoding = match options.encoding {
                    Some(enc) => enc,
                    None => PostEncoding::detect(content_type.unwrap_or(""))?,
                };
                let processor = PostProcessor::new(
                    &encoding, options.max_field_head);
                Mode::Post { processor, reader }
            }
        };
        Ok(UploadState { mode, decoder_done: false })
    }

    /// Consumes the decoded body bytes and runs callbacks
    ///
    /// All of `data` is always taken over, on `Suspend` the undelivered
    /// part is kept until `deliver` is called.
    pub fn feed(&mut self, data: &[u8]) -> Result<Verdict, UploadError> {
        match self.mode {
            Mode::Full { limit, ref mut buf, .. } => {
                if buf.len() + data.len() > limit {
                    return Err(UploadError::TooLarge);
                }
                buf.extend_from_slice(data);
                Ok(Verdict::Continue)
            }
            Mode::Incremental { ref mut reader, ref mut offset } => {
                if data.is_empty() {
                    return Ok(Verdict::Continue);
                }
                let action = reader.chunk(data, *offset);
                *offset += data.len() as u64;
                Ok(verdict(action))
            }
            Mode::Post { ref mut processor, .. } => {
                processor.push(data)?;
                self.deliver()
            }
        }
    }

    /// Delivers field events queued by a previous `feed`
    pub fn deliver(&mut self) -> Result<Verdict, UploadError> {
        if let Mode::Post { ref mut processor, ref mut reader } = self.mode {
            while let Some(event) = processor.pop() {
                match reader.field(&event.field, &event.data, event.offset) {
                    UploadAction::Continue => {}
                    action => return Ok(verdict(action)),
                }
            }
        }
        Ok(Verdict::Continue)
    }

    /// Whether events are waiting for delivery
    pub fn has_pending(&self) -> bool {
        match self.mode {
            Mode::Post { ref processor, .. } => processor.front().is_some(),
            _ => false,
        }
    }

    /// Finishes the upload after the last body byte
    ///
    /// Safe to call again after a `Suspend`, the final callback is asked
    /// again then.
    pub fn finish(&mut self) -> Result<Verdict, UploadError> {
        if !self.decoder_done {
            if let Mode::Post { ref mut processor, .. } = self.mode {
                processor.finish()?;
            }
            self.decoder_done = true;
        }
        match self.deliver()? {
            Verdict::Continue => {}
            other => return Ok(other),
        }
        match self.mode {
            Mode::Full { ref buf, ref mut callback, .. } => {
                final_verdict(callback(buf.len() as u64, buf),
                              "full body callback answered Continue")
            }
            Mode::Incremental { ref mut reader, .. } => {
                final_verdict(reader.end(), "end callback answered Continue")
            }
            Mode::Post { ref mut reader, .. } => {
                final_verdict(reader.done(), "done callback answered Continue")
            }
        }
    }
}

impl fmt::Debug for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mode = match self.mode {
            Mode::Full { .. } => "full",
            Mode::Incremental { .. } => "incremental",
            Mode::Post { .. } => "post",
        };
        f.debug_struct("UploadState")
            .field("mode", &mode)
            .field("decoder_done", &self.decoder_done)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::{PostEncoding, UploadError, UploadState, Upload, Verdict};
    use super::{PostReader, PostOptions, UploadAction, Field, UploadReader};

    #[test]
    fn detect() {
        assert_eq!(PostEncoding::detect(
            "application/x-www-form-urlencoded; charset=utf-8").unwrap(),
            PostEncoding::UrlEncoded);
        assert_eq!(PostEncoding::detect(
            "Multipart/Form-Data; boundary=\"abc def\"").unwrap(),
            PostEncoding::Multipart { boundary: "abc def".into() });
        assert!(matches!(PostEncoding::detect("multipart/form-data"),
                         Err(UploadError::Malformed(_))));
        assert!(matches!(PostEncoding::detect("text/plain"),
            Err(UploadError::UnsupportedMediaType(ref m)) if m == "text/plain"));
    }

    type Log = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    /// Collects fields, suspends after every `suspend_every` calls
    struct Collect {
        log: Log,
        calls: usize,
        suspend_every: usize,
        done: usize,
    }

    impl PostReader for Collect {
        fn field(&mut self, field: &Field, data: &[u8], offset: u64)
            -> UploadAction
        {
            let mut log = self.log.lock().unwrap();
            if offset == 0 {
                log.push((field.name.clone(), Vec::new()));
            }
            log.last_mut().unwrap().1.extend_from_slice(data);
            self.calls += 1;
            if self.suspend_every > 0 && self.calls % self.suspend_every == 0 {
                UploadAction::Suspend
            } else {
                UploadAction::Continue
            }
        }
        fn done(&mut self) -> UploadAction {
            self.done += 1;
            // first answer is a suspend, to check the question is repeated
            if self.suspend_every > 0 && self.done == 1 {
                UploadAction::Suspend
            } else {
                UploadAction::Abort
            }
        }
    }

    fn run(body: &[u8], step: usize, suspend_every: usize)
        -> Vec<(String, Vec<u8>)>
    {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let upload = Upload::post(PostOptions::default(), Collect {
            log: log.clone(),
            calls: 0,
            suspend_every,
            done: 0,
        });
        let mut state = UploadState::new(upload, None,
            Some("application/x-www-form-urlencoded")).unwrap();
        for chunk in body.chunks(step) {
            let mut verdict = state.feed(chunk).unwrap();
            while let Verdict::Suspend = verdict {
                verdict = state.deliver().unwrap();
            }
            assert!(matches!(verdict, Verdict::Continue));
            assert!(!state.has_pending());
        }
        let mut verdict = state.finish().unwrap();
        while let Verdict::Suspend = verdict {
            verdict = state.finish().unwrap();
        }
        assert!(matches!(verdict, Verdict::Abort));
        let result = log.lock().unwrap().clone();
        result
    }

    #[test]
    fn suspend_is_transparent() {
        let body = b"first=one+two&second=%E2%9C%93&third=&fourth=xxxxxxxxxx";
        let expected = run(body, body.len(), 0);
        assert_eq!(expected.len(), 4);
        assert_eq!(expected[1], ("second".to_string(),
                                 "\u{2713}".as_bytes().to_vec()));
        for step in 1..8 {
            for every in 1..4 {
                assert_eq!(run(body, step, every), expected,
                           "step {} suspend every {}", step, every);
            }
        }
    }

    #[test]
    fn full_limit() {
        let upload = Upload::full(4, |_, _| UploadAction::Abort);
        assert!(matches!(UploadState::new(upload, Some(5), None),
                         Err(UploadError::TooLarge)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let upload = Upload::full(4, move |size, data: &[u8]| {
            seen2.lock().unwrap().push((size, data.to_vec()));
            UploadAction::Abort
        });
        let mut state = UploadState::new(upload, None, None).unwrap();
        assert!(matches!(state.feed(b"ab").unwrap(), Verdict::Continue));
        assert!(matches!(state.feed(b"cd").unwrap(), Verdict::Continue));
        assert!(matches!(state.finish().unwrap(), Verdict::Abort));
        assert_eq!(*seen.lock().unwrap(), vec![(4, b"abcd".to_vec())]);
        assert!(matches!(state.feed(b"e"), Err(UploadError::TooLarge)));
    }

    type Seen = Arc<Mutex<Vec<(u64, Vec<u8>)>>>;

    /// Records chunks, `end()` answers `Continue` if the flag is set
    struct Chunks(Seen, bool);

    impl UploadReader for Chunks {
        fn chunk(&mut self, data: &[u8], offset: u64) -> UploadAction {
            self.0.lock().unwrap().push((offset, data.to_vec()));
            UploadAction::Continue
        }
        fn end(&mut self) -> UploadAction {
            if self.1 {
                UploadAction::Continue
            } else {
                UploadAction::Abort
            }
        }
    }

    #[test]
    fn incremental_offsets() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut state = UploadState::new(
            Upload::incremental(Chunks(seen.clone(), false)), Some(5), None)
            .unwrap();
        state.feed(b"abc").unwrap();
        state.feed(b"").unwrap();
        state.feed(b"de").unwrap();
        assert!(matches!(state.finish().unwrap(), Verdict::Abort));
        assert_eq!(*seen.lock().unwrap(), vec![
            (0, b"abc".to_vec()),
            (3, b"de".to_vec()),
        ]);
    }

    #[test]
    fn continue_from_end_is_violation() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut state = UploadState::new(
            Upload::incremental(Chunks(seen, true)), None, None)
            .unwrap();
        assert!(matches!(state.finish(), Err(UploadError::Contract(_))));
    }

    #[test]
    fn unsupported_media() {
        let upload = Upload::post(PostOptions::default(), Collect {
            log: Arc::new(Mutex::new(Vec::new())),
            calls: 0,
            suspend_every: 0,
            done: 0,
        });
        assert!(matches!(UploadState::new(upload, None, Some("text/xml")),
                         Err(UploadError::UnsupportedMediaType(_))));
    }
}
