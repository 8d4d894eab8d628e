//! Knowledge-base lookup results.
//!
//! The store answers with a single row. Its `solutions` column is stored as
//! either a JSON array or a string holding a Python-style list literal
//! (`"['Check pump', 'Check pressure']"`), depending on how the row was
//! imported. [`SolutionsValue`] captures that ambiguity and [`QueryResultRow`]
//! resolves it once, so nothing past the store boundary sees the raw column.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DESCRIPTION_COLUMN: &str = "description";
pub const SOLUTIONS_COLUMN: &str = "solutions";

#[derive(Clone, Debug, PartialEq)]
pub enum SolutionsValue {
    List(Vec<Value>),
    Encoded(String),
    Missing,
}

impl SolutionsValue {
    pub fn from_column(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Array(items)) => Self::List(items.clone()),
            Some(Value::String(raw)) => Self::Encoded(raw.clone()),
            _ => Self::Missing,
        }
    }

    /// Always yields an ordered list. A string that does not decode to a list
    /// literal becomes a single step holding the original text.
    pub fn normalize(self) -> Vec<String> {
        match self {
            Self::List(items) => items.into_iter().map(value_to_step).collect(),
            Self::Encoded(raw) => match parse_list_literal(&raw) {
                Ok(Literal::List(items)) => items.into_iter().map(Literal::into_step).collect(),
                Ok(_) | Err(_) => vec![raw],
            },
            Self::Missing => Vec::new(),
        }
    }
}

fn value_to_step(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// First row of a knowledge query, keyed by column name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResultRow {
    fields: BTreeMap<String, Value>,
    solutions: Vec<String>,
}

impl QueryResultRow {
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        let solutions = SolutionsValue::from_column(fields.get(SOLUTIONS_COLUMN)).normalize();
        Self { fields, solutions }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn description(&self) -> Option<&str> {
        self.fields.get(DESCRIPTION_COLUMN).and_then(Value::as_str)
    }

    pub fn solutions(&self) -> &[String] {
        &self.solutions
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Str(String),
    Number(String),
    Bool(bool),
    None,
    /// Nested lists keep their source text.
    List(Vec<Literal>),
    NestedList(String),
}

impl Literal {
    fn into_step(self) -> String {
        match self {
            Self::Str(text) | Self::Number(text) | Self::NestedList(text) => text,
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::None => "None".to_string(),
            Self::List(_) => String::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LiteralError(usize);

fn parse_list_literal(raw: &str) -> Result<Literal, LiteralError> {
    let mut parser = LiteralParser { source: raw, chars: raw.char_indices().collect(), pos: 0 };
    parser.skip_whitespace();
    let value = parser.value(0)?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(LiteralError(parser.pos));
    }
    Ok(value)
}

struct LiteralParser<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl LiteralParser<'_> {
    const MAX_DEPTH: usize = 32;

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, ch)| *ch)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn byte_offset(&self, pos: usize) -> usize {
        self.chars.get(pos).map_or(self.source.len(), |(offset, _)| *offset)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn value(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        if depth > Self::MAX_DEPTH {
            return Err(LiteralError(self.pos));
        }
        match self.peek() {
            Some('[') => {
                let start = self.pos;
                let list = self.list(depth)?;
                if depth == 0 {
                    Ok(list)
                } else {
                    let text = &self.source[self.byte_offset(start)..self.byte_offset(self.pos)];
                    Ok(Literal::NestedList(text.to_string()))
                }
            }
            Some(quote @ ('\'' | '"')) => self.string(quote),
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.' => self.number(),
            Some(ch) if ch.is_ascii_alphabetic() => self.keyword(),
            _ => Err(LiteralError(self.pos)),
        }
    }

    fn list(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(Literal::List(items));
            }
            items.push(self.value(depth + 1)?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(Literal::List(items)),
                _ => return Err(LiteralError(self.pos)),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<Literal, LiteralError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(LiteralError(self.pos)),
                Some(ch) if ch == quote => return Ok(Literal::Str(text)),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some(escaped @ ('\\' | '\'' | '"')) => text.push(escaped),
                    Some('\n') => {}
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => return Err(LiteralError(self.pos)),
                },
                Some(ch) => text.push(ch),
            }
        }
    }

    fn number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        let digits_start = self.pos;
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '_'))
        {
            self.bump();
        }
        let text = &self.source[self.byte_offset(start)..self.byte_offset(self.pos)];
        let digits = &self.source[self.byte_offset(digits_start)..self.byte_offset(self.pos)];
        if digits.replace('_', "").parse::<f64>().is_err() {
            return Err(LiteralError(start));
        }
        Ok(Literal::Number(text.to_string()))
    }

    fn keyword(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            self.bump();
        }
        match &self.source[self.byte_offset(start)..self.byte_offset(self.pos)] {
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            _ => Err(LiteralError(start)),
        }
    }
}
