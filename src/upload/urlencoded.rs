use std::collections::VecDeque;
use std::sync::Arc;

use super::{Event, Field, UploadError};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Percent,
    Hex(u8),
}

#[derive(Debug)]
enum State {
    Name(Vec<u8>),
    Value { field: Arc<Field>, offset: u64 },
}

/// Streaming decoder of `application/x-www-form-urlencoded` bodies
///
/// Names are collected whole (bounded by `max_name`), values are decoded
/// and reported as they arrive.
#[derive(Debug)]
pub struct UrlDecoder {
    state: State,
    escape: Escape,
    max_name: usize,
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl UrlDecoder {
    pub fn new(max_name: usize) -> UrlDecoder {
        UrlDecoder {
            state: State::Name(Vec::new()),
            escape: Escape::None,
            max_name,
        }
    }

    /// Decodes a single byte which is not a separator
    fn decode(&mut self, b: u8) -> Result<Option<u8>, UploadError> {
        match self.escape {
            Escape::None if b == b'%' => {
                self.escape = Escape::Percent;
                Ok(None)
            }
            Escape::None if b == b'+' => Ok(Some(b' ')),
            Escape::None => Ok(Some(b)),
            Escape::Percent => {
                let high = hex(b).ok_or(
                    UploadError::Malformed("bad percent escape"))?;
                self.escape = Escape::Hex(high);
                Ok(None)
            }
            Escape::Hex(high) => {
                let low = hex(b).ok_or(
                    UploadError::Malformed("bad percent escape"))?;
                self.escape = Escape::None;
                Ok(Some((high << 4) | low))
            }
        }
    }

    fn check_escape(&self) -> Result<(), UploadError> {
        if self.escape != Escape::None {
            return Err(UploadError::Malformed("truncated percent escape"));
        }
        Ok(())
    }

    pub fn push(&mut self, data: &[u8], events: &mut VecDeque<Event>)
        -> Result<(), UploadError>
    {
        let mut value = Vec::new();
        for &b in data {
            match b {
                b'&' => {
                    self.check_escape()?;
                    self.end_field(&mut value, events);
                }
                b'=' if matches!(self.state, State::Name(_)) => {
                    self.check_escape()?;
                    if let State::Name(ref name) = self.state {
                        let name = String::from_utf8_lossy(name).into_owned();
                        self.state = State::Value {
                            field: Arc::new(Field::named(name)),
                            offset: 0,
                        };
                    }
                }
                _ => {
                    if let Some(b) = self.decode(b)? {
                        match self.state {
                            State::Name(ref mut name) => {
                                if name.len() >= self.max_name {
                                    return Err(UploadError::FieldHeadTooLarge);
                                }
                                name.push(b);
                            }
                            State::Value { .. } => value.push(b),
                        }
                    }
                }
            }
        }
        self.emit(&mut value, false, events);
        Ok(())
    }

    /// Reports buffered value bytes, an empty value only if `last`
    /// and nothing was reported for the field yet
    fn emit(&mut self, value: &mut Vec<u8>, last: bool,
            events: &mut VecDeque<Event>)
    {
        if let State::Value { ref field, ref mut offset } = self.state {
            if !value.is_empty() || (last && *offset == 0) {
                let data = std::mem::replace(value, Vec::new());
                let len = data.len() as u64;
                events.push_back(Event {
                    field: field.clone(),
                    offset: *offset,
                    data,
                });
                *offset += len;
            }
        }
    }

    fn end_field(&mut self, value: &mut Vec<u8>,
                 events: &mut VecDeque<Event>)
    {
        match self.state {
            State::Name(ref name) => {
                // a name without `=` is a field with an empty value
                if !name.is_empty() {
                    let name = String::from_utf8_lossy(name).into_owned();
                    events.push_back(Event {
                        field: Arc::new(Field::named(name)),
                        offset: 0,
                        data: Vec::new(),
                    });
                }
            }
            State::Value { .. } => self.emit(value, true, events),
        }
        self.state = State::Name(Vec::new());
    }

    pub fn finish(&mut self, events: &mut VecDeque<Event>)
        -> Result<(), UploadError>
    {
        self.check_escape()?;
        self.end_field(&mut Vec::new(), events);
        Ok(())
    }
}
