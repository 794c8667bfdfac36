//! Minimal literal grammar for argument blocks
//!
//! Rendering is canonical and compact (`{page:2,title:'a;b'}`): no
//! whitespace, single-quoted strings, bare keys where possible. Parsing is
//! more lenient and accepts whitespace, double quotes and quoted keys.

use crate::error::{CodecError, MalformedToken};
use crate::value::{Mapping, Value};

/// Deepest list/map nesting accepted inside an argument block
pub const MAX_NESTING: usize = 32;

/// Render a value in canonical literal form
pub fn render_value(value: &Value) -> Result<String, CodecError> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

/// Render a mapping as a `{...}` block
pub fn render_mapping<'a, I>(entries: I) -> Result<String, CodecError>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut out = String::new();
    write_mapping(&mut out, entries, 0)?;
    Ok(out)
}

fn write_mapping<'a, I>(out: &mut String, entries: I, depth: usize) -> Result<(), CodecError>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    out.push('{');
    for (idx, (key, value)) in entries.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        write_key(out, key);
        out.push(':');
        write_value(out, value, depth)?;
    }
    out.push('}');
    Ok(())
}

/// Render a scalar in the plain positional form used by the Compact shape
pub fn render_plain(value: &Value) -> Result<String, CodecError> {
    match value {
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => render_float(*f),
        Value::Str(s) => Ok(s.clone()),
        other => Err(CodecError::not_compactable(format!(
            "{} value has no plain form",
            other.kind_name()
        ))),
    }
}

/// Parse a complete `{...}` block into a mapping
pub fn parse_mapping(text: &str) -> Result<Mapping, MalformedToken> {
    let mut parser = Parser::new(text);
    parser.skip_ws();
    let at = parser.pos;
    let value = parser.parse_map()?;
    parser.finish()?;
    match value {
        Value::Map(map) => Ok(map),
        _ => Err(MalformedToken::literal(at, "expected mapping")),
    }
}

/// Parse a single literal value, rejecting trailing input
pub fn parse_value(text: &str) -> Result<Value, MalformedToken> {
    let mut parser = Parser::new(text);
    let value = parser.parse_value()?;
    parser.finish()?;
    Ok(value)
}

fn write_value(out: &mut String, value: &Value, depth: usize) -> Result<(), CodecError> {
    if matches!(value, Value::List(_) | Value::Map(_)) && depth == MAX_NESTING {
        return Err(CodecError::Unrepresentable(format!(
            "values nested deeper than {MAX_NESTING} levels"
        )));
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&render_float(*f)?),
        Value::Str(s) => write_quoted(out, s),
        Value::List(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(']');
        }
        Value::Map(map) => write_mapping(out, map, depth + 1)?,
    }
    Ok(())
}

fn render_float(f: f64) -> Result<String, CodecError> {
    if !f.is_finite() {
        return Err(CodecError::Unrepresentable(format!("non-finite float {f}")));
    }
    // Debug output is the shortest round-trip form and always carries '.' or 'e'
    Ok(format!("{f:?}"))
}

fn write_key(out: &mut String, key: &str) {
    if is_bare_key(key) {
        out.push_str(key);
    } else {
        write_quoted(out, key);
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

pub(crate) fn is_bare_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), MalformedToken> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(MalformedToken::literal(self.pos, format!("expected '{want}'"))),
        }
    }

    fn finish(&mut self) -> Result<(), MalformedToken> {
        self.skip_ws();
        if self.pos == self.text.len() {
            Ok(())
        } else {
            Err(MalformedToken::literal(self.pos, "trailing input"))
        }
    }

    fn parse_value(&mut self) -> Result<Value, MalformedToken> {
        self.skip_ws();
        match self.peek() {
            Some('\'') | Some('"') => self.parse_string().map(Value::Str),
            Some('[') => self.nested(Self::parse_list),
            Some('{') => self.nested(Self::parse_map),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() => {
                let at = self.pos;
                match self.parse_word() {
                    "null" => Ok(Value::Null),
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    word => Err(MalformedToken::literal(at, format!("unknown word '{word}'"))),
                }
            }
            Some(_) => Err(MalformedToken::literal(self.pos, "unexpected character")),
            None => Err(MalformedToken::literal(self.pos, "unexpected end of input")),
        }
    }

    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Value, MalformedToken>,
    ) -> Result<Value, MalformedToken> {
        if self.depth == MAX_NESTING {
            return Err(MalformedToken::literal(self.pos, "nesting too deep"));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn parse_word(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    fn parse_number(&mut self) -> Result<Value, MalformedToken> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        {
            self.bump();
        }
        let raw = &self.text[start..self.pos];
        if raw.contains(['.', 'e', 'E']) {
            match raw.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(MalformedToken::literal(start, format!("bad float '{raw}'"))),
            }
        } else {
            raw.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| MalformedToken::literal(start, format!("bad integer '{raw}'")))
        }
    }

    fn parse_string(&mut self) -> Result<String, MalformedToken> {
        let start = self.pos;
        let quote = self
            .bump()
            .ok_or_else(|| MalformedToken::literal(start, "expected quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(MalformedToken::UnterminatedQuote { at: start }),
                Some('\\') => match self.bump() {
                    None => return Err(MalformedToken::UnterminatedQuote { at: start }),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_list(&mut self) -> Result<Value, MalformedToken> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Value::List(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(Value::List(items)),
                _ => return Err(MalformedToken::literal(self.pos, "expected ',' or ']'")),
            }
        }
    }

    fn parse_map(&mut self) -> Result<Value, MalformedToken> {
        self.expect('{')?;
        let mut map = Mapping::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Value::Map(map));
        }
        loop {
            self.skip_ws();
            let at = self.pos;
            let key = match self.peek() {
                Some('\'') | Some('"') => self.parse_string()?,
                Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_word().to_string(),
                _ => return Err(MalformedToken::literal(at, "expected key")),
            };
            self.expect(':')?;
            let value = self.parse_value()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(MalformedToken::literal(at, format!("duplicate key '{key}'")));
            }
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Map(map)),
                _ => return Err(MalformedToken::literal(self.pos, "expected ',' or '}'")),
            }
        }
    }
}
