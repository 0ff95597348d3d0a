//! Tolerant reader for JSON documents that are still arriving.
//!
//! [`parse_partial`] accepts any prefix of a well-formed document and returns
//! the structure recoverable so far:
//!
//! - containers that are not closed yet are returned with what they hold;
//! - an array element is only kept once it is complete;
//! - an object member is kept once its value is complete, or as soon as its
//!   value is a container (which is then partial itself);
//! - unfinished strings, numbers, literals and keys are dropped.
//!
//! Input that is not the prefix of any JSON document yields `None`.

use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 128;

/// Parses a possibly truncated JSON document. Never panics.
pub fn parse_partial(text: &str) -> Option<Value> {
    let mut reader = Reader {
        bytes: text.as_bytes(),
        pos: 0,
        depth: 0,
    };
    match reader.value() {
        Ok(Parsed::Complete(value)) => Some(value),
        Ok(Parsed::Partial(value)) => value,
        Err(Malformed) => None,
    }
}

enum Parsed {
    Complete(Value),
    /// Input ended inside this value. Containers carry their complete part.
    Partial(Option<Value>),
}

struct Malformed;

type Step = Result<Parsed, Malformed>;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Step {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(Parsed::Partial(None)),
            Some(b'{') => self.nested(Self::object),
            Some(b'[') => self.nested(Self::array),
            Some(b'"') => Ok(match self.string()? {
                Some(s) => Parsed::Complete(Value::String(s)),
                None => Parsed::Partial(None),
            }),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(Malformed),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Step) -> Step {
        if self.depth >= MAX_DEPTH {
            return Err(Malformed);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn array(&mut self) -> Step {
        self.pos += 1;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(Parsed::Complete(Value::Array(items)));
        }

        loop {
            match self.value()? {
                Parsed::Complete(item) => items.push(item),
                Parsed::Partial(_) => return Ok(Parsed::Partial(Some(Value::Array(items)))),
            }
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Array(items)))),
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Parsed::Complete(Value::Array(items)));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    fn object(&mut self) -> Step {
        self.pos += 1;
        let mut members = Map::new();
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Parsed::Complete(Value::Object(members)));
        }

        loop {
            self.skip_whitespace();
            let key = match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Object(members)))),
                Some(b'"') => match self.string()? {
                    Some(key) => key,
                    None => return Ok(Parsed::Partial(Some(Value::Object(members)))),
                },
                Some(_) => return Err(Malformed),
            };

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Object(members)))),
                Some(b':') => self.pos += 1,
                Some(_) => return Err(Malformed),
            }

            match self.value()? {
                Parsed::Complete(value) => {
                    members.insert(key, value);
                }
                Parsed::Partial(partial) => {
                    if let Some(container) = partial {
                        members.insert(key, container);
                    }
                    return Ok(Parsed::Partial(Some(Value::Object(members))));
                }
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Object(members)))),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Parsed::Complete(Value::Object(members)));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    /// Reads a string starting at the opening quote. `None` if the input
    /// ends before the closing quote.
    fn string(&mut self) -> Result<Option<String>, Malformed> {
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();

        loop {
            let Some(byte) = self.peek() else {
                return Ok(None);
            };
            self.pos += 1;
            match byte {
                b'"' => return String::from_utf8(out).map(Some).map_err(|_| Malformed),
                b'\\' => {
                    let Some(escape) = self.peek() else {
                        return Ok(None);
                    };
                    self.pos += 1;
                    let decoded = match escape {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'/' => '/',
                        b'b' => '\u{8}',
                        b'f' => '\u{c}',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'u' => match self.unicode_escape()? {
                            Some(c) => c,
                            None => return Ok(None),
                        },
                        _ => return Err(Malformed),
                    };
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
                }
                0x00..=0x1f => return Err(Malformed),
                _ => out.push(byte),
            }
        }
    }

    /// Decodes the `XXXX` of a `\uXXXX` escape, joining surrogate pairs.
    fn unicode_escape(&mut self) -> Result<Option<char>, Malformed> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high as u32).map(Some).ok_or(Malformed);
        }

        for expected in [b'\\', b'u'] {
            match self.peek() {
                None => return Ok(None),
                Some(b) if b == expected => self.pos += 1,
                Some(_) => return Err(Malformed),
            }
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Err(Malformed);
        }
        let code = 0x10000 + (((high as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
        char::from_u32(code).map(Some).ok_or(Malformed)
    }

    fn hex4(&mut self) -> Result<Option<u16>, Malformed> {
        let mut code: u16 = 0;
        for _ in 0..4 {
            let Some(byte) = self.peek() else {
                return Ok(None);
            };
            let digit = (byte as char).to_digit(16).ok_or(Malformed)?;
            code = code * 16 + digit as u16;
            self.pos += 1;
        }
        Ok(Some(code))
    }

    fn literal(&mut self, word: &str, value: Value) -> Step {
        let rest = &self.bytes[self.pos..];
        let word = word.as_bytes();
        if rest.len() < word.len() {
            return if word.starts_with(rest) {
                self.pos = self.bytes.len();
                Ok(Parsed::Partial(None))
            } else {
                Err(Malformed)
            };
        }
        if !rest.starts_with(word) {
            return Err(Malformed);
        }
        self.pos += word.len();
        Ok(Parsed::Complete(value))
    }

    fn number(&mut self) -> Step {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        // More digits may still arrive.
        if self.pos == self.bytes.len() {
            return Ok(Parsed::Partial(None));
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).map_err(|_| Malformed)?;
        text.parse::<Number>()
            .map(|n| Parsed::Complete(Value::Number(n)))
            .map_err(|_| Malformed)
    }
}
