//! Minimal Well-Known Text (WKT1 / WKT2) tree parser.
//!
//! Only the structure is parsed; interpretation happens in [`crate::crs`].
//! Both `[]` and `()` delimiters are accepted, and doubled quotes inside
//! strings are unescaped.

use crate::error::{ProjectionError, Result};

/// A value inside a WKT node.
#[derive(Debug, Clone, PartialEq)]
pub enum WktValue {
    /// Quoted string
    Text(String),
    /// Numeric literal
    Number(f64),
    /// Bare enumeration keyword (e.g. `EAST`)
    Keyword(String),
    /// Nested node
    Node(WktNode),
}

/// A WKT node: `KEYWORD[value, value, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WktNode {
    pub keyword: String,
    pub values: Vec<WktValue>,
}

impl WktNode {
    /// Parse a complete WKT string into its root node.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            src: input,
            bytes: input.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let node = parser.parse_node()?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(parser.error("trailing characters after root node"));
        }
        Ok(node)
    }

    /// The first quoted string of this node, conventionally its name.
    pub fn name(&self) -> Option<&str> {
        self.values.iter().find_map(|v| match v {
            WktValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// The `index`-th numeric value of this node.
    pub fn number(&self, index: usize) -> Option<f64> {
        self.values
            .iter()
            .filter_map(|v| match v {
                WktValue::Number(n) => Some(*n),
                _ => None,
            })
            .nth(index)
    }

    /// Direct children with the given keyword (case-insensitive).
    pub fn children<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a WktNode> + 'a {
        self.values.iter().filter_map(move |v| match v {
            WktValue::Node(n) if n.keyword.eq_ignore_ascii_case(keyword) => Some(n),
            _ => None,
        })
    }

    /// First direct child with the given keyword.
    pub fn child<'a>(&'a self, keyword: &str) -> Option<&'a WktNode> {
        self.values.iter().find_map(|v| match v {
            WktValue::Node(n) if n.keyword.eq_ignore_ascii_case(keyword) => Some(n),
            _ => None,
        })
    }

    /// Depth-first search for the first node (including `self`) whose keyword
    /// is any of `keywords`.
    pub fn find_any(&self, keywords: &[&str]) -> Option<&WktNode> {
        if keywords
            .iter()
            .any(|k| self.keyword.eq_ignore_ascii_case(k))
        {
            return Some(self);
        }
        self.values.iter().find_map(|v| match v {
            WktValue::Node(n) => n.find_any(keywords),
            _ => None,
        })
    }

    pub fn is(&self, keywords: &[&str]) -> bool {
        keywords
            .iter()
            .any(|k| self.keyword.eq_ignore_ascii_case(k))
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> ProjectionError {
        ProjectionError::InvalidWkt {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_ident(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn parse_node(&mut self) -> Result<WktNode> {
        let keyword = self.read_ident();
        if keyword.is_empty() {
            return Err(self.error("expected keyword"));
        }
        self.skip_ws();
        let keyword = keyword.to_string();
        self.parse_body(keyword)
    }

    fn parse_body(&mut self, keyword: String) -> Result<WktNode> {
        let close = match self.peek() {
            Some(b'[') => b']',
            Some(b'(') => b')',
            _ => return Err(self.error("expected '[' or '('")),
        };
        self.pos += 1;

        let mut values = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b) if b == close && values.is_empty() => {
                    self.pos += 1;
                    break;
                }
                Some(b'"') => values.push(WktValue::Text(self.read_string()?)),
                Some(b) if b.is_ascii_digit() || b == b'-' || b == b'+' || b == b'.' => {
                    values.push(WktValue::Number(self.read_number()?))
                }
                Some(b) if b.is_ascii_alphabetic() => {
                    let ident = self.read_ident().to_string();
                    self.skip_ws();
                    if matches!(self.peek(), Some(b'[') | Some(b'(')) {
                        values.push(WktValue::Node(self.parse_body(ident)?));
                    } else {
                        values.push(WktValue::Keyword(ident));
                    }
                }
                _ => return Err(self.error("unexpected character")),
            }
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }

        Ok(WktNode { keyword, values })
    }

    fn read_string(&mut self) -> Result<String> {
        // Opening quote
        self.pos += 1;
        let mut out = String::new();
        let mut start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    out.push_str(&self.src[start..self.pos]);
                    self.pos += 1;
                    if self.peek() == Some(b'"') {
                        out.push('"');
                        self.pos += 1;
                        start = self.pos;
                    } else {
                        return Ok(out);
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn read_number(&mut self) -> Result<f64> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b) if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        self.src[start..self.pos]
            .parse::<f64>()
            .map_err(|_| self.error("invalid number"))
    }
}
