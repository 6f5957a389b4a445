use std::collections::BTreeMap;
use std::fmt::Write;

use thiserror::Error;
use unicode_general_category::{GeneralCategory, get_general_category};

/// Stream labels. `BTreeMap` keeps keys in ascending order, which is the
/// canonical order of the rendered label string.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelParseError {
    #[error("label string must be wrapped in braces")]
    Unbraced,

    #[error("unexpected end of label string")]
    UnexpectedEnd,

    #[error("expected {expected:?} at offset {offset}")]
    Expected { expected: char, offset: usize },

    #[error("empty label name at offset {0}")]
    EmptyName(usize),

    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),
}

/// Render labels as `{k1="v1", k2="v2"}`.
pub fn format_labels(labels: &Labels) -> String {
    let mut out = String::with_capacity(2 + labels.len() * 16);
    out.push('{');
    for (i, (k, v)) in labels.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(k);
        out.push('=');
        quote_into(&mut out, v);
    }
    out.push('}');
    out
}

/// Double-quote `value` using the Go string-literal escapes that Loki's
/// label parser understands.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    quote_into(&mut out, value);
    out
}

fn quote_into(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0B}' => out.push_str("\\v"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if is_printable(c) => out.push(c),
            c if (c as u32) < 0x10000 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => {
                let _ = write!(out, "\\U{:08x}", c as u32);
            }
        }
    }
    out.push('"');
}

/// Letters, marks, numbers, punctuation, symbols and the ASCII space.
fn is_printable(c: char) -> bool {
    c == ' '
        || !matches!(
            get_general_category(c),
            GeneralCategory::Control
                | GeneralCategory::Format
                | GeneralCategory::Surrogate
                | GeneralCategory::PrivateUse
                | GeneralCategory::Unassigned
                | GeneralCategory::SpaceSeparator
                | GeneralCategory::LineSeparator
                | GeneralCategory::ParagraphSeparator
        )
}

/// Parse a label string produced by [`format_labels`] back into labels.
pub fn parse_labels(input: &str) -> Result<Labels, LabelParseError> {
    let mut parser = Parser { input, pos: 0 };
    parser.labels()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn labels(&mut self) -> Result<Labels, LabelParseError> {
        let mut labels = Labels::new();
        self.skip_ws();
        if self.next() != Some('{') {
            return Err(LabelParseError::Unbraced);
        }
        self.skip_ws();
        if self.peek() == Some('}') {
            self.next();
            return self.end(labels);
        }

        loop {
            let name = self.name()?;
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.quoted()?;
            labels.insert(name, value);
            self.skip_ws();
            let offset = self.pos;
            match self.next() {
                Some(',') => self.skip_ws(),
                Some('}') => return self.end(labels),
                Some(_) => return Err(LabelParseError::Expected { expected: '}', offset }),
                None => return Err(LabelParseError::UnexpectedEnd),
            }
        }
    }

    fn end(&mut self, labels: Labels) -> Result<Labels, LabelParseError> {
        self.skip_ws();
        if self.pos == self.input.len() {
            Ok(labels)
        } else {
            Err(LabelParseError::Unbraced)
        }
    }

    fn name(&mut self) -> Result<String, LabelParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            self.next();
        }
        if self.pos == start {
            return Err(LabelParseError::EmptyName(start));
        }
        Ok(self.input[start..self.pos].to_owned())
    }

    fn quoted(&mut self) -> Result<String, LabelParseError> {
        self.expect('"')?;
        let mut value = String::new();
        loop {
            let at = self.pos;
            match self.next().ok_or(LabelParseError::UnexpectedEnd)? {
                '"' => return Ok(value),
                '\\' => value.push(self.escape(at)?),
                c => value.push(c),
            }
        }
    }

    fn escape(&mut self, at: usize) -> Result<char, LabelParseError> {
        let c = match self.next().ok_or(LabelParseError::UnexpectedEnd)? {
            '"' => '"',
            '\\' => '\\',
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0C}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{0B}',
            'x' => self.hex(2).filter(char::is_ascii).ok_or(LabelParseError::InvalidEscape(at))?,
            'u' => self.hex(4).ok_or(LabelParseError::InvalidEscape(at))?,
            'U' => self.hex(8).ok_or(LabelParseError::InvalidEscape(at))?,
            _ => return Err(LabelParseError::InvalidEscape(at)),
        };
        Ok(c)
    }

    fn hex(&mut self, digits: usize) -> Option<char> {
        let raw = self.input.get(self.pos..self.pos + digits)?;
        if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let code = u32::from_str_radix(raw, 16).ok()?;
        self.pos += digits;
        char::from_u32(code)
    }

    fn expect(&mut self, expected: char) -> Result<(), LabelParseError> {
        let offset = self.pos;
        match self.next() {
            Some(c) if c == expected => Ok(()),
            Some(_) => Err(LabelParseError::Expected { expected, offset }),
            None => Err(LabelParseError::UnexpectedEnd),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.next();
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}
