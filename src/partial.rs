//! Partial decoder
//!
//! Turns a prefix of a JSON document into the best available value. The
//! recovery rule is fixed so the result only ever grows as the prefix grows:
//!
//! - an unterminated string is closed at the cut and keeps its content,
//! - an unterminated array or object is closed at the cut and keeps the
//!   elements or members that were fully started,
//! - a member whose key is unfinished, or whose value has not started, is dropped,
//! - a number or literal (`true`, `false`, `null`) cut before its end is
//!   dropped, since its final value is not yet known,
//! - an escape sequence cut in the middle is dropped from its string, as is
//!   a high surrogate whose low half has not arrived.
//!
//! Once the top-level value is complete, anything after it is ignored.

use serde_json::{Map, Number, Value};

/// Raised when the buffer cannot be read as (a prefix of) JSON
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected character {found:?} at byte {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("invalid number at byte {offset}")]
    InvalidNumber { offset: usize },

    #[error("invalid escape sequence at byte {offset}")]
    InvalidEscape { offset: usize },
}

/// Decodes a possibly truncated JSON buffer.
///
/// Returns `None` when the buffer is empty, holds only whitespace, or does not
/// start like JSON. Callers treat that as "no data yet".
pub fn decode_partial(input: &str) -> Option<Value> {
    match try_decode_partial(input) {
        Ok(value) => value,
        Err(err) => {
            tracing::trace!(error = %err, "buffer is not decodable yet");
            None
        }
    }
}

/// Like [`decode_partial`] but reports why a buffer was rejected.
pub fn try_decode_partial(input: &str) -> Result<Option<Value>, DecodeError> {
    // Complete documents need no recovery
    if let Ok(value) = serde_json::from_str::<Value>(input) {
        return Ok(Some(value));
    }

    let mut parser = Parser::new(input);
    parser.skip_whitespace();
    match parser.peek() {
        None => Ok(None),
        Some(b'{') | Some(b'[') => Ok(parser.parse_value()?.map(Fragment::into_value)),
        Some(_) => Err(parser.unexpected()),
    }
}

/// Decodes the JSON object embedded in a model's output.
///
/// Models may write prose before the document, and that prose may itself
/// contain braces. Each `{` is tried in turn and the first one that decodes
/// wins. Returns `None` while no object has started.
pub fn decode_embedded_object(buffer: &str) -> Option<Value> {
    buffer
        .match_indices('{')
        .find_map(|(start, _)| decode_partial(&buffer[start..]).filter(Value::is_object))
}

enum Fragment {
    Complete(Value),
    Partial(Value),
}

impl Fragment {
    fn into_value(self) -> Value {
        match self {
            Fragment::Complete(v) | Fragment::Partial(v) => v,
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> DecodeError {
        let found = self.src[self.pos..].chars().next().unwrap_or('\0');
        DecodeError::Unexpected {
            found,
            offset: self.pos,
        }
    }

    /// Parses the value at the cursor. `Ok(None)` means the input ended
    /// before any usable part of the value.
    fn parse_value(&mut self) -> Result<Option<Fragment>, DecodeError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(None),
            Some(b'{') => self.parse_object().map(Some),
            Some(b'[') => self.parse_array().map(Some),
            Some(b'"') => {
                let (text, complete) = self.parse_string()?;
                let value = Value::String(text);
                Ok(Some(if complete {
                    Fragment::Complete(value)
                } else {
                    Fragment::Partial(value)
                }))
            }
            Some(b't') => self.parse_literal("true", Value::Bool(true)),
            Some(b'f') => self.parse_literal("false", Value::Bool(false)),
            Some(b'n') => self.parse_literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.parse_number(),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn parse_object(&mut self) -> Result<Fragment, DecodeError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Fragment::Partial(Value::Object(map))),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Fragment::Complete(Value::Object(map)));
                }
                Some(b'"') => {}
                Some(_) => return Err(self.unexpected()),
            }

            let (key, key_complete) = self.parse_string()?;
            if !key_complete {
                return Ok(Fragment::Partial(Value::Object(map)));
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Fragment::Partial(Value::Object(map))),
                Some(b':') => self.pos += 1,
                Some(_) => return Err(self.unexpected()),
            }

            match self.parse_value()? {
                None => return Ok(Fragment::Partial(Value::Object(map))),
                Some(Fragment::Partial(value)) => {
                    map.insert(key, value);
                    return Ok(Fragment::Partial(Value::Object(map)));
                }
                Some(Fragment::Complete(value)) => {
                    map.insert(key, value);
                }
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Fragment::Partial(Value::Object(map))),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Fragment::Complete(Value::Object(map)));
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Fragment, DecodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(b']') {
                self.pos += 1;
                return Ok(Fragment::Complete(Value::Array(items)));
            }

            match self.parse_value()? {
                None => return Ok(Fragment::Partial(Value::Array(items))),
                Some(Fragment::Partial(value)) => {
                    items.push(value);
                    return Ok(Fragment::Partial(Value::Array(items)));
                }
                Some(Fragment::Complete(value)) => items.push(value),
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Fragment::Partial(Value::Array(items))),
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Fragment::Complete(Value::Array(items)));
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    /// Reads a string literal; the flag reports whether the closing quote was seen.
    fn parse_string(&mut self) -> Result<(String, bool), DecodeError> {
        self.pos += 1;
        let mut out = String::new();
        let mut run_start = self.pos;
        loop {
            match self.peek() {
                None => {
                    out.push_str(&self.src[run_start..self.pos]);
                    return Ok((out, false));
                }
                Some(b'"') => {
                    out.push_str(&self.src[run_start..self.pos]);
                    self.pos += 1;
                    return Ok((out, true));
                }
                Some(b'\\') => {
                    out.push_str(&self.src[run_start..self.pos]);
                    match self.parse_escape()? {
                        Some(c) => out.push(c),
                        None => return Ok((out, false)),
                    }
                    run_start = self.pos;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Reads an escape sequence starting at the backslash. `Ok(None)` means
    /// the input ended inside it.
    fn parse_escape(&mut self) -> Result<Option<char>, DecodeError> {
        let start = self.pos;
        self.pos += 1;
        let Some(kind) = self.peek() else {
            return Ok(None);
        };
        self.pos += 1;
        let c = match kind {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => return self.parse_unicode_escape(start),
            _ => return Err(DecodeError::InvalidEscape { offset: start }),
        };
        Ok(Some(c))
    }

    fn parse_unicode_escape(&mut self, start: usize) -> Result<Option<char>, DecodeError> {
        let Some(high) = self.read_hex4(start)? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(
                char::from_u32(u32::from(high)).unwrap_or(char::REPLACEMENT_CHARACTER),
            ));
        }

        // High surrogate: the pair is only known once the low half arrives
        let rest = &self.bytes[self.pos..];
        if rest.len() < 2 && b"\\u".starts_with(rest) {
            return Ok(None);
        }
        if !rest.starts_with(b"\\u") {
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        }
        let checkpoint = self.pos;
        self.pos += 2;
        let Some(low) = self.read_hex4(checkpoint)? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            // Not a pair; leave the second escape to be read on its own
            self.pos = checkpoint;
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        }
        let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
        Ok(Some(
            char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
        ))
    }

    fn read_hex4(&mut self, start: usize) -> Result<Option<u16>, DecodeError> {
        let digits = &self.bytes[self.pos..self.bytes.len().min(self.pos + 4)];
        if !digits.iter().all(u8::is_ascii_hexdigit) {
            return Err(DecodeError::InvalidEscape { offset: start });
        }
        if digits.len() < 4 {
            self.pos = self.bytes.len();
            return Ok(None);
        }
        self.pos += 4;
        let text = std::str::from_utf8(digits)
            .map_err(|_| DecodeError::InvalidEscape { offset: start })?;
        u16::from_str_radix(text, 16)
            .map(Some)
            .map_err(|_| DecodeError::InvalidEscape { offset: start })
    }

    fn parse_literal(
        &mut self,
        word: &'static str,
        value: Value,
    ) -> Result<Option<Fragment>, DecodeError> {
        let rest = &self.bytes[self.pos..];
        if rest.starts_with(word.as_bytes()) {
            self.pos += word.len();
            return Ok(Some(Fragment::Complete(value)));
        }
        if word.as_bytes().starts_with(rest) {
            self.pos = self.bytes.len();
            return Ok(None);
        }
        Err(self.unexpected())
    }

    fn parse_number(&mut self) -> Result<Option<Fragment>, DecodeError> {
        let start = self.pos;
        while let Some(b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9') = self.peek() {
            self.pos += 1;
        }
        if self.pos == self.bytes.len() {
            // More digits may follow
            return Ok(None);
        }
        let text = &self.src[start..self.pos];
        serde_json::from_str::<Number>(text)
            .map(|n| Some(Fragment::Complete(Value::Number(n))))
            .map_err(|_| DecodeError::InvalidNumber { offset: start })
    }
}
