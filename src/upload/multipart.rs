use std::collections::VecDeque;
use std::str::from_utf8;
use std::sync::Arc;

use httparse;

use crate::headers;
use super::{Event, Field, UploadError};

/// Part headers beyond this number are a malformed request
const MAX_PART_HEADERS: usize = 16;


#[derive(Debug)]
enum State {
    /// Skipping everything up to the first delimiter
    Preamble,
    /// Right after a delimiter: either `--` or line end follows
    AfterDelimiter,
    Headers,
    Body { field: Arc<Field>, offset: u64 },
    /// After the closing delimiter, the rest is ignored
    Epilogue,
}

/// Streaming decoder of `multipart/form-data` bodies
///
/// Body data is reported as soon as it can't be a part of the next
/// delimiter, so at most `delimiter.len() - 1` bytes are held back.
#[derive(Debug)]
pub struct MultipartDecoder {
    state: State,
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    max_head: usize,
    seen_data: bool,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl MultipartDecoder {
    pub fn new(boundary: &str, max_head: usize) -> MultipartDecoder {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());
        MultipartDecoder {
            state: State::Preamble,
            delimiter,
            // lets the very first delimiter match without a preamble
            buf: b"\r\n".to_vec(),
            max_head,
            seen_data: false,
        }
    }

    pub fn push(&mut self, data: &[u8], events: &mut VecDeque<Event>)
        -> Result<(), UploadError>
    {
        if !data.is_empty() {
            self.seen_data = true;
        }
        self.buf.extend_from_slice(data);
        while self.step(events)? {}
        Ok(())
    }

    /// Makes a single transition, returns `false` if more input is needed
    fn step(&mut self, events: &mut VecDeque<Event>)
        -> Result<bool, UploadError>
    {
        let keep = self.delimiter.len() - 1;
        match self.state {
            State::Preamble => {
                match find(&self.buf, &self.delimiter) {
                    Some(idx) => {
                        self.buf.drain(..idx + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                        Ok(true)
                    }
                    None => {
                        let skip = self.buf.len().saturating_sub(keep);
                        self.buf.drain(..skip);
                        Ok(false)
                    }
                }
            }
            State::AfterDelimiter => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if self.buf.starts_with(b"--") {
                    self.buf.clear();
                    self.state = State::Epilogue;
                    return Ok(true);
                }
                // transport padding is allowed before the line end
                match find(&self.buf, b"\r\n") {
                    Some(idx) => {
                        if self.buf[..idx].iter()
                            .any(|&b| b != b' ' && b != b'\t')
                        {
                            return Err(UploadError::Malformed(
                                "garbage after multipart delimiter"));
                        }
                        self.buf.drain(..idx+2);
                        self.state = State::Headers;
                        Ok(true)
                    }
                    None if self.buf.len() > self.max_head => {
                        Err(UploadError::FieldHeadTooLarge)
                    }
                    None => Ok(false),
                }
            }
            State::Headers => {
                let (len, field) = {
                    let mut raw = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
                    match httparse::parse_headers(&self.buf, &mut raw) {
                        Ok(httparse::Status::Complete((len, parsed))) => {
                            if len > self.max_head {
                                return Err(UploadError::FieldHeadTooLarge);
                            }
                            (len, part_field(parsed)?)
                        }
                        Ok(httparse::Status::Partial) => {
                            if self.buf.len() > self.max_head {
                                return Err(UploadError::FieldHeadTooLarge);
                            }
                            return Ok(false);
                        }
                        Err(httparse::Error::TooManyHeaders) => {
                            return Err(UploadError::FieldHeadTooLarge);
                        }
                        Err(_) => {
                            return Err(UploadError::Malformed(
                                "invalid part headers"));
                        }
                    }
                };
                self.buf.drain(..len);
                self.state = State::Body { field: Arc::new(field), offset: 0 };
                Ok(true)
            }
            State::Body { ref field, ref mut offset } => {
                match find(&self.buf, &self.delimiter) {
                    Some(idx) => {
                        // every part is reported, even an empty one
                        if idx > 0 || *offset == 0 {
                            events.push_back(Event {
                                field: field.clone(),
                                offset: *offset,
                                data: self.buf[..idx].to_vec(),
                            });
                        }
                        self.buf.drain(..idx + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                        Ok(true)
                    }
                    None => {
                        let ready = self.buf.len().saturating_sub(keep);
                        if ready > 0 {
                            let data = self.buf.drain(..ready)
                                .collect::<Vec<_>>();
                            events.push_back(Event {
                                field: field.clone(),
                                offset: *offset,
                                data,
                            });
                            *offset += ready as u64;
                        }
                        Ok(false)
                    }
                }
            }
            State::Epilogue => {
                self.buf.clear();
                Ok(false)
            }
        }
    }

    pub fn finish(&mut self, _events: &mut VecDeque<Event>)
        -> Result<(), UploadError>
    {
        match self.state {
            State::Epilogue => Ok(()),
            _ if !self.seen_data => Ok(()),
            _ => Err(UploadError::Malformed("unterminated multipart body")),
        }
    }
}

fn part_field(parsed: &[httparse::Header]) -> Result<Field, UploadError> {
    let mut disposition = None;
    let mut content_type = None;
    let mut encoding = None;
    for header in parsed {
        let value = from_utf8(header.value).map_err(|_| {
            UploadError::Malformed("part header is not valid utf-8")
        })?;
        if header.name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(value);
        } else if headers::is_content_type(header.name) {
            content_type = Some(value.trim().to_string());
        } else if header.name
            .eq_ignore_ascii_case("content-transfer-encoding")
        {
            encoding = Some(value.trim().to_string());
        }
    }
    let disposition = disposition.ok_or(
        UploadError::Malformed("part without Content-Disposition"))?;
    let name = headers::param(disposition, "name").ok_or(
        UploadError::Malformed("part without a name"))?;
    Ok(Field {
        name,
        filename: headers::param(disposition, "filename"),
        content_type,
        encoding,
    })
}
