//! Compact message literal grammar.
//!
//! Messages and patterns may be written in a relaxed object notation instead
//! of JSON:
//!
//! ```text
//! say: Hello, to: Mr. Smith          -> {"say": "Hello", "to": "Mr. Smith"}
//! check: mw, payload: 111            -> {"check": "mw", "payload": 111}
//! {type: state-tree, keys: [a, b]}   -> {"type": "state-tree", "keys": ["a", "b"]}
//! ```
//!
//! Handles:
//! - Optional outer braces
//! - Bare keys and bare values (trimmed), or single/double quoted strings
//! - Nested objects `{...}` and arrays `[...]`
//! - `true`, `false`, `null` and numbers in bare values
//!
//! Nesting is limited to [`MAX_DEPTH`] levels.

use serde_json::{Map, Number, Value};

use crate::error::{DispatchResult, Error};

/// Deepest nesting of objects and arrays inside a literal.
pub const MAX_DEPTH: usize = 128;

/// Parses a compact literal into a JSON object.
pub fn parse(input: &str) -> DispatchResult<Map<String, Value>> {
    let mut parser = Parser::new(input);
    parser.skip_ws();

    let map = if parser.peek() == Some('{') {
        parser.bump();
        let map = parser.members(Some('}'))?;
        parser.skip_ws();
        parser.expect('}')?;
        map
    } else {
        parser.members(None)?
    };

    parser.skip_ws();
    if parser.peek().is_some() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(map)
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.input.len(), |(offset, _)| *offset)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> DispatchResult<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected `{expected}`")))
        }
    }

    fn descend(&mut self) -> DispatchResult<()> {
        if self.depth == MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, reason: &str) -> Error {
        Error::Literal {
            input: self.input.to_string(),
            position: self.offset(),
            reason: reason.to_string(),
        }
    }

    fn members(&mut self, close: Option<char>) -> DispatchResult<Map<String, Value>> {
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(c) if Some(c) == close => break,
                _ => {}
            }

            let key = self.key()?;
            self.skip_ws();
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);

            self.skip_ws();
            if self.peek() == Some(',') {
                self.bump();
            } else {
                break;
            }
        }
        Ok(map)
    }

    fn key(&mut self) -> DispatchResult<String> {
        if let Some(quote @ ('"' | '\'')) = self.peek() {
            return self.quoted(quote);
        }

        let start = self.offset();
        while let Some(c) = self.peek() {
            match c {
                ':' => break,
                ',' | '{' | '}' | '[' | ']' => {
                    return Err(self.error("expected `:` after key"));
                }
                _ => self.pos += 1,
            }
        }
        let key = self.input[start..self.offset()].trim();
        if key.is_empty() {
            return Err(self.error("expected a key"));
        }
        Ok(key.to_string())
    }

    fn value(&mut self) -> DispatchResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some('{') => {
                self.descend()?;
                self.bump();
                let map = self.members(Some('}'))?;
                self.skip_ws();
                self.expect('}')?;
                self.depth -= 1;
                Ok(Value::Object(map))
            }
            Some('[') => self.elements(),
            Some(quote @ ('"' | '\'')) => self.quoted(quote).map(Value::String),
            Some(_) => self.bare(),
            None => Err(self.error("expected a value")),
        }
    }

    fn elements(&mut self) -> DispatchResult<Value> {
        self.descend()?;
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                break;
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.peek() == Some(',') {
                self.bump();
            } else {
                break;
            }
        }
        self.skip_ws();
        self.expect(']')?;
        self.depth -= 1;
        Ok(Value::Array(items))
    }

    fn quoted(&mut self, quote: char) -> DispatchResult<String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn bare(&mut self) -> DispatchResult<Value> {
        let start = self.offset();
        while let Some(c) = self.peek() {
            if matches!(c, ',' | '}' | ']') {
                break;
            }
            self.pos += 1;
        }
        let text = self.input[start..self.offset()].trim();
        if text.is_empty() {
            return Err(self.error("expected a value"));
        }
        Ok(scalar(text))
    }
}

fn scalar(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    let numeric = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
    if numeric {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}
