// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("filter syntax error at {position}: {message}")]
pub struct FilterSyntaxError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterExpr {
    pub type_query: TypeQuery,
    pub arg_query: Option<Vec<Clause>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypeQuery {
    Substring { value: String },
    Regex { value: String, flags: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clause {
    pub lhs: Operand,
    pub op: Op,
    pub rhs: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Op {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "=~")]
    Match,
    #[serde(rename = "!~")]
    NotMatch,
}

/// `foo`, `foo.bar`, `foo[3]`, `foo["x"]` and chains of those.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Name(String),
    Access(Box<Reference>, AccessKey),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessKey {
    Name(String),
    Index(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reference(Reference),
    Regex { pattern: String, flags: String },
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Array(Vec<Literal>),
    Object(Vec<(String, Literal)>),
}

impl Literal {
    fn kind(&self) -> &'static str {
        match self {
            Literal::Number(_) => "number",
            Literal::String(_) => "string",
            Literal::Boolean(_) => "boolean",
            Literal::Null => "null",
            Literal::Array(_) => "array",
            Literal::Object(_) => "object",
        }
    }
}

fn serialize_number<S: Serializer>(value: f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(value as i64)
    } else {
        serializer.serialize_f64(value)
    }
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Literal::Number(n) => serialize_number(*n, serializer),
            Literal::String(s) => serializer.serialize_str(s),
            Literal::Boolean(b) => serializer.serialize_bool(*b),
            Literal::Null => serializer.serialize_unit(),
            Literal::Array(values) => serializer.collect_seq(values),
            Literal::Object(entries) => serializer.collect_map(entries.iter().map(|(k, v)| (k, v))),
        }
    }
}

impl Serialize for AccessKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AccessKey::Name(name) => serializer.serialize_str(name),
            AccessKey::Index(index) => serializer.serialize_i64(*index),
        }
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reference::Name(name) => serializer.serialize_str(name),
            Reference::Access(base, key) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "access")?;
                map.serialize_entry("base", base)?;
                map.serialize_entry("name", key)?;
                map.end()
            }
        }
    }
}

impl Serialize for Operand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Operand::Reference(reference) => {
                map.serialize_entry("type", "reference")?;
                map.serialize_entry("value", reference)?;
            }
            Operand::Regex { pattern, flags } => {
                map.serialize_entry("type", "regex")?;
                map.serialize_entry("value", pattern)?;
                map.serialize_entry("flags", flags)?;
            }
            Operand::Literal(literal) => {
                map.serialize_entry("type", literal.kind())?;
                map.serialize_entry("value", literal)?;
            }
        }
        map.end()
    }
}

/// Parses a filter expression:
///
/// ```text
/// filter    := typeQuery argQuery? timeRange?
/// typeQuery := substring | '/' regex '/' flags?
/// argQuery  := '(' (clause (',' clause)*)? ')'
/// clause    := reference op value
/// timeRange := '[' number ',' number ']'
/// ```
pub fn parse(input: &str) -> Result<FilterExpr, FilterSyntaxError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let expr = parser.filter()?;
    parser.skip_whitespace();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

type ParseResult<T> = Result<T, FilterSyntaxError>;

impl Parser {
    fn error(&self, message: impl Into<String>) -> FilterSyntaxError {
        FilterSyntaxError {
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

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> ParseResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn filter(&mut self) -> ParseResult<FilterExpr> {
        self.skip_whitespace();
        let type_query = self.type_query()?;
        self.skip_whitespace();
        let arg_query = if self.peek() == Some('(') {
            Some(self.arg_query()?)
        } else {
            None
        };
        self.skip_whitespace();
        let time_range = if self.peek() == Some('[') {
            Some(self.time_range()?)
        } else {
            None
        };
        Ok(FilterExpr {
            type_query,
            arg_query,
            time_range,
        })
    }

    fn type_query(&mut self) -> ParseResult<TypeQuery> {
        if self.peek() == Some('/') {
            let (value, flags) = self.regex()?;
            return Ok(TypeQuery::Regex { value, flags });
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '(' && c != '[') {
            self.pos += 1;
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        let value = value.trim();
        if value.is_empty() {
            return Err(self.error("expected an event type query"));
        }
        Ok(TypeQuery::Substring {
            value: value.to_string(),
        })
    }

    /// `/pattern/flags`; escapes are kept verbatim for the regex engine.
    fn regex(&mut self) -> ParseResult<(String, String)> {
        self.expect('/')?;
        let mut pattern = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated regex")),
                Some('/') => break,
                Some('\\') => {
                    pattern.push('\\');
                    match self.bump() {
                        Some(c) => pattern.push(c),
                        None => return Err(self.error("unterminated regex")),
                    }
                }
                Some(c) => pattern.push(c),
            }
        }
        if pattern.is_empty() {
            return Err(self.error("empty regex"));
        }
        let mut flags = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_alphabetic) {
            flags.push(c);
            self.pos += 1;
        }
        Ok((pattern, flags))
    }

    fn arg_query(&mut self) -> ParseResult<Vec<Clause>> {
        self.expect('(')?;
        let mut clauses = Vec::new();
        self.skip_whitespace();
        if self.eat(')') {
            return Ok(clauses);
        }
        loop {
            clauses.push(self.clause()?);
            self.skip_whitespace();
            if self.eat(')') {
                return Ok(clauses);
            }
            self.expect(',')?;
        }
    }

    fn clause(&mut self) -> ParseResult<Clause> {
        self.skip_whitespace();
        let lhs = Operand::Reference(self.reference()?);
        self.skip_whitespace();
        let op = self.op()?;
        self.skip_whitespace();
        let rhs = match self.peek() {
            Some('/') => {
                let (pattern, flags) = self.regex()?;
                Operand::Regex { pattern, flags }
            }
            _ => Operand::Literal(self.literal()?),
        };
        Ok(Clause { lhs, op, rhs })
    }

    fn op(&mut self) -> ParseResult<Op> {
        let two: String = self.chars[self.pos..].iter().take(2).collect();
        let (op, len) = match two.as_str() {
            "<=" => (Op::Le, 2),
            ">=" => (Op::Ge, 2),
            "==" => (Op::Eq, 2),
            "!=" => (Op::Ne, 2),
            "=~" => (Op::Match, 2),
            "!~" => (Op::NotMatch, 2),
            _ => match self.peek() {
                Some('<') => (Op::Lt, 1),
                Some('>') => (Op::Gt, 1),
                _ => return Err(self.error("expected a comparison operator")),
            },
        };
        self.pos += len;
        Ok(op)
    }

    fn identifier(&mut self) -> ParseResult<String> {
        let start = self.pos;
        if !self
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        {
            return Err(self.error("expected an identifier"));
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn reference(&mut self) -> ParseResult<Reference> {
        let mut reference = Reference::Name(self.identifier()?);
        loop {
            if self.eat('.') {
                let name = self.identifier()?;
                reference = Reference::Access(Box::new(reference), AccessKey::Name(name));
            } else if self.eat('[') {
                self.skip_whitespace();
                let key = match self.literal()? {
                    Literal::String(name) => AccessKey::Name(name),
                    Literal::Number(n) if n.fract() == 0.0 && n >= 0.0 => AccessKey::Index(n as i64),
                    _ => return Err(self.error("expected an index or a string key")),
                };
                self.skip_whitespace();
                self.expect(']')?;
                reference = Reference::Access(Box::new(reference), key);
            } else {
                return Ok(reference);
            }
        }
    }

    fn literal(&mut self) -> ParseResult<Literal> {
        match self.peek() {
            Some('"') | Some('\'') => self.string().map(Literal::String),
            Some('[') => self.array(),
            Some('{') => self.object(),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                self.number().map(Literal::Number)
            }
            Some(c) if c.is_ascii_alphabetic() => match self.identifier()?.as_str() {
                "true" => Ok(Literal::Boolean(true)),
                "false" => Ok(Literal::Boolean(false)),
                "null" => Ok(Literal::Null),
                other => Err(self.error(format!("unexpected identifier '{other}'"))),
            },
            _ => Err(self.error("expected a value")),
        }
    }

    fn number(&mut self) -> ParseResult<f64> {
        let start = self.pos;
        let negative = self.eat('-');
        if !negative {
            self.eat('+');
        }
        let two: String = self.chars[self.pos..].iter().take(2).collect();
        if two.eq_ignore_ascii_case("0x") {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("invalid hex number"))? as f64;
            return Ok(if negative { -value } else { value });
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
            self.pos += 1;
            if !self.eat('-') {
                self.eat('+');
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| FilterSyntaxError {
                position: start,
                message: format!("invalid number '{text}'"),
            })
    }

    fn string(&mut self) -> ParseResult<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(value),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('u') => self.unicode_escape()?,
                        Some(c) => c,
                        None => return Err(self.error("unterminated string")),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn unicode_escape(&mut self) -> ParseResult<char> {
        let end = self.pos + 4;
        if end > self.chars.len() {
            return Err(self.error("truncated unicode escape"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        let code = u32::from_str_radix(&digits, 16).map_err(|_| self.error("invalid unicode escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn array(&mut self) -> ParseResult<Literal> {
        self.expect('[')?;
        let mut values = Vec::new();
        self.skip_whitespace();
        if self.eat(']') {
            return Ok(Literal::Array(values));
        }
        loop {
            self.skip_whitespace();
            values.push(self.literal()?);
            self.skip_whitespace();
            if self.eat(']') {
                return Ok(Literal::Array(values));
            }
            self.expect(',')?;
        }
    }

    fn object(&mut self) -> ParseResult<Literal> {
        self.expect('{')?;
        let mut entries = Vec::new();
        self.skip_whitespace();
        if self.eat('}') {
            return Ok(Literal::Object(entries));
        }
        loop {
            self.skip_whitespace();
            let key = match self.peek() {
                Some('"') | Some('\'') => self.string()?,
                _ => self.identifier()?,
            };
            self.skip_whitespace();
            self.expect(':')?;
            self.skip_whitespace();
            entries.push((key, self.literal()?));
            self.skip_whitespace();
            if self.eat('}') {
                return Ok(Literal::Object(entries));
            }
            self.expect(',')?;
        }
    }

    fn time_range(&mut self) -> ParseResult<(f64, f64)> {
        self.expect('[')?;
        self.skip_whitespace();
        let start = self.number()?;
        self.skip_whitespace();
        self.expect(',')?;
        self.skip_whitespace();
        let end = self.number()?;
        self.skip_whitespace();
        self.expect(']')?;
        Ok((start, end))
    }
}
