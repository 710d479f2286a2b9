// src/core/literal.rs

//! A restricted parser for Python-style literals.
//!
//! Accepts `None`, `True`, `False`, integers, floats, quoted strings, lists,
//! tuples, sets and dicts, arbitrarily nested. Nothing is ever evaluated:
//! names other than the three constants are syntax errors.

use crate::models::Value;
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid literal '{input}' at position {position}: {message}")]
pub struct LiteralError {
    pub input: String,
    pub position: usize,
    pub message: String,
}

impl LiteralError {
    /// An error about `input` as a whole rather than one position in it.
    pub(crate) fn whole(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            position: 0,
            message: message.into(),
        }
    }
}

pub type LiteralResult<T> = Result<T, LiteralError>;

/// Parses a complete literal; trailing input is an error.
pub fn parse_literal(input: &str) -> LiteralResult<Value> {
    let mut parser = LiteralParser::new(input);
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct LiteralParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            input: self.input.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> LiteralResult<()> {
        self.skip_whitespace();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected '{}' but found '{}'", expected, c)))
            }
            None => Err(self.error(format!("expected '{}' but input ended", expected))),
        }
    }

    fn parse_value(&mut self) -> LiteralResult<Value> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("expected a value but input ended")),
            Some('\'') | Some('"') => self.parse_string().map(Value::Str),
            Some('[') => self.parse_sequence('[', ']').map(|(items, _)| Value::List(items)),
            Some('(') => self.parse_tuple(),
            Some('{') => self.parse_braced(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_constant(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn parse_constant(&mut self) -> LiteralResult<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars.get(start..self.pos).unwrap_or_default().iter().collect();
        match word.as_str() {
            "None" => Ok(Value::None),
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            _ => {
                self.pos = start;
                Err(self.error(format!("names are not allowed in literals: '{}'", word)))
            }
        }
    }

    fn parse_number(&mut self) -> LiteralResult<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => self.pos += 1,
                '.' => {
                    is_float = true;
                    self.pos += 1;
                }
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text: String = self
            .chars
            .get(start..self.pos)
            .unwrap_or_default()
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let parsed = if is_float {
            // Infinities have no literal form to render back to.
            text.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::Float)
        } else {
            text.parse::<i64>().ok().map(Value::Int)
        };
        parsed.ok_or_else(|| {
            self.pos = start;
            self.error(format!("malformed number '{}'", text))
        })
    }

    fn parse_string(&mut self) -> LiteralResult<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated escape sequence"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' => out.push(escaped),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
        // Adjacent string literals concatenate.
        self.skip_whitespace();
        if matches!(self.peek(), Some('\'') | Some('"')) {
            out.push_str(&self.parse_string()?);
        }
        Ok(out)
    }

    /// Parses `open item, item, ... close`; returns the items and whether a
    /// separating comma was seen.
    fn parse_sequence(&mut self, open: char, close: char) -> LiteralResult<(Vec<Value>, bool)> {
        self.expect(open)?;
        let mut items = Vec::new();
        let mut saw_comma = false;
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok((items, saw_comma));
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => saw_comma = true,
                Some(c) if c == close => return Ok((items, saw_comma)),
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or '{}' but found '{}'", close, c)));
                }
                None => return Err(self.error(format!("expected '{}' but input ended", close))),
            }
        }
    }

    fn parse_tuple(&mut self) -> LiteralResult<Value> {
        let (mut items, saw_comma) = self.parse_sequence('(', ')')?;
        // `(x)` is a parenthesized value, `(x,)` a one-element tuple.
        if items.len() == 1 && !saw_comma {
            return Ok(items.remove(0));
        }
        Ok(Value::List(items))
    }

    fn parse_braced(&mut self) -> LiteralResult<Value> {
        self.expect('{')?;
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Value::Map(IndexMap::new()));
        }
        let first = self.parse_value()?;
        self.skip_whitespace();
        if self.peek() == Some(':') {
            self.parse_dict_rest(first)
        } else {
            self.parse_set_rest(first)
        }
    }

    fn parse_dict_rest(&mut self, first_key: Value) -> LiteralResult<Value> {
        let mut map = IndexMap::new();
        let mut key = first_key;
        loop {
            let key_pos = self.pos;
            self.expect(':')?;
            let value = self.parse_value()?;
            let key_text = match key {
                Value::Str(s) => s,
                other => other.scalar_text().ok_or_else(|| LiteralError {
                    input: self.input.to_string(),
                    position: key_pos,
                    message: format!("unhashable dict key of type {}", other.kind()),
                })?,
            };
            map.insert(key_text, value);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => {
                    self.skip_whitespace();
                    if self.peek() == Some('}') {
                        self.pos += 1;
                        return Ok(Value::Map(map));
                    }
                    key = self.parse_value()?;
                }
                Some('}') => return Ok(Value::Map(map)),
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or '}}' but found '{}'", c)));
                }
                None => return Err(self.error("expected '}' but input ended")),
            }
        }
    }

    fn parse_set_rest(&mut self, first: Value) -> LiteralResult<Value> {
        let mut items = vec![first];
        loop {
            self.skip_whitespace();
            match self.bump() {
                Some(',') => {
                    self.skip_whitespace();
                    if self.peek() == Some('}') {
                        self.pos += 1;
                        break;
                    }
                    let item = self.parse_value()?;
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                Some('}') => break,
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or '}}' but found '{}'", c)));
                }
                None => return Err(self.error("expected '}' but input ended")),
            }
        }
        Ok(Value::List(items))
    }
}
