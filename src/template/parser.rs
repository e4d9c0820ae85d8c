//! Named-parameter scanner for SQL templates.
//!
//! Recognizes `:name` and `:name.path.to.field` outside of string literals,
//! quoted identifiers and comments, and rewrites each occurrence to a
//! positional `$n` placeholder.

use std::fmt::Write;
use std::ops::Range;

use tracing::debug;

use crate::error::ParseError;

/// A `:name` occurrence in the template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVariable {
    /// Full dotted name as written, without the leading `:`.
    pub name: String,
    /// Byte range of the token including the `:`.
    pub span: Range<usize>,
}

impl TemplateVariable {
    /// Argument map key: the part before the first dot.
    pub fn key(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Segments after the first dot.
    pub fn property_path(&self) -> Vec<&str> {
        self.name.split('.').skip(1).collect()
    }

    pub fn has_property_path(&self) -> bool {
        self.name.contains('.')
    }
}

/// Scanner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    pub variables: Vec<TemplateVariable>,
    pub rewritten: String,
}

#[inline]
fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

#[inline]
fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

pub struct TemplateParser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TemplateParser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    /// Scan the whole text.
    pub fn parse(text: &'a str) -> Result<ParsedTemplate, ParseError> {
        Self::new(text).run()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn prev_is_ident_char(&self) -> bool {
        self.pos > 0 && (is_ident_char(self.bytes[self.pos - 1]) || self.bytes[self.pos - 1] == b'$')
    }

    fn run(mut self) -> Result<ParsedTemplate, ParseError> {
        let mut variables = Vec::new();

        while let Some(c) = self.peek(0) {
            match c {
                b':' => match self.peek(1) {
                    // Type cast, never a parameter.
                    Some(b':') => self.pos += 2,
                    Some(n) if is_ident_start(n) => variables.push(self.variable()),
                    _ => self.pos += 1,
                },
                b'\'' => {
                    let escapes = self.pos > 0
                        && matches!(self.bytes[self.pos - 1], b'E' | b'e')
                        && !(self.pos > 1 && is_ident_char(self.bytes[self.pos - 2]));
                    self.skip_quoted_string(escapes)?;
                }
                b'"' => self.skip_quoted_identifier()?,
                b'$' => self.skip_dollar_quote()?,
                b'-' if self.peek(1) == Some(b'-') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment()?,
                _ => self.pos += 1,
            }
        }

        let rewritten = rewrite(self.text, &variables);
        debug!(
            variables = variables.len(),
            "parsed query template"
        );
        Ok(ParsedTemplate {
            variables,
            rewritten,
        })
    }

    /// `:ident(.ident)*`, positioned on the `:`.
    fn variable(&mut self) -> TemplateVariable {
        let start = self.pos;
        self.pos += 1;
        self.consume_ident();
        while self.peek(0) == Some(b'.') && self.peek(1).is_some_and(is_ident_start) {
            self.pos += 1;
            self.consume_ident();
        }
        TemplateVariable {
            name: self.text[start + 1..self.pos].to_string(),
            span: start..self.pos,
        }
    }

    fn consume_ident(&mut self) {
        while self.peek(0).is_some_and(is_ident_char) {
            self.pos += 1;
        }
    }

    /// `'...'` with `''` as an escaped quote, and `\'` too for `E'...'`.
    fn skip_quoted_string(&mut self, backslash_escapes: bool) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => return Err(ParseError::UnterminatedQuotedString { position: start }),
                Some(b'\\') if backslash_escapes => self.pos += 2,
                Some(b'\'') if self.peek(1) == Some(b'\'') => self.pos += 2,
                Some(b'\'') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn skip_quoted_identifier(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => return Err(ParseError::UnterminatedQuotedIdentifier { position: start }),
                Some(b'"') if self.peek(1) == Some(b'"') => self.pos += 2,
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// `$tag$ ... $tag$`. A `$` that doesn't open a valid tag (`$1`, `a$b`) is plain text.
    fn skip_dollar_quote(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        if self.prev_is_ident_char() {
            self.pos += 1;
            return Ok(());
        }

        let mut tag_end = start + 1;
        if self.bytes.get(tag_end).copied().is_some_and(is_ident_start) {
            while self.bytes.get(tag_end).copied().is_some_and(is_ident_char) {
                tag_end += 1;
            }
        }
        if self.bytes.get(tag_end) != Some(&b'$') {
            self.pos += 1;
            return Ok(());
        }

        let delimiter = &self.text[start..=tag_end];
        let body_start = tag_end + 1;
        match self.text[body_start..].find(delimiter) {
            Some(offset) => {
                self.pos = body_start + offset + delimiter.len();
                Ok(())
            }
            None => Err(ParseError::UnterminatedDollarQuote {
                position: start,
                tag: self.text[start + 1..tag_end].to_string(),
            }),
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
    }

    /// Block comments nest.
    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match (self.peek(0), self.peek(1)) {
                (None, _) => return Err(ParseError::UnterminatedComment { position: start }),
                (Some(b'/'), Some(b'*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some(b'*'), Some(b'/')) => {
                    depth -= 1;
                    self.pos += 2;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => self.pos += 1,
            }
        }
    }
}

/// Replace each variable span with `$1`, `$2`, ... in order.
fn rewrite(text: &str, variables: &[TemplateVariable]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (i, var) in variables.iter().enumerate() {
        out.push_str(&text[last..var.span.start]);
        let _ = write!(out, "${}", i + 1);
        last = var.span.end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(parsed: &ParsedTemplate) -> Vec<&str> {
        parsed.variables.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn test_variables_in_order() {
        let text = "SELECT * FROM t WHERE a=:x AND b=:y";
        let parsed = TemplateParser::parse(text).unwrap();
        assert_eq!(names(&parsed), vec!["x", "y"]);
        assert_eq!(parsed.variables[0].span, 24..26);
        assert_eq!(parsed.variables[1].span, 33..35);
        assert_eq!(&text[parsed.variables[0].span.clone()], ":x");
        assert_eq!(parsed.rewritten, "SELECT * FROM t WHERE a=$1 AND b=$2");
    }

    #[test]
    fn test_repeated_variable() {
        let parsed = TemplateParser::parse("SELECT :a, :b, :a").unwrap();
        assert_eq!(names(&parsed), vec!["a", "b", "a"]);
        assert_eq!(parsed.rewritten, "SELECT $1, $2, $3");
    }

    #[test]
    fn test_literal_hides_variables() {
        let parsed =
            TemplateParser::parse("SELECT 'literal :notavar', 'it''s :also' FROM t").unwrap();
        assert!(parsed.variables.is_empty());
    }

    #[test]
    fn test_unterminated_quote() {
        let err = TemplateParser::parse("SELECT * FROM t WHERE a = 'abc").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedQuotedString { position: 26 });
        assert_eq!(err.position(), 26);
    }

    #[test]
    fn test_dollar_quotes() {
        let parsed = TemplateParser::parse(
            "CREATE FUNCTION f() RETURNS int AS $body$ SELECT :fake $body$; SELECT $$ :also $$, :real",
        )
        .unwrap();
        assert_eq!(names(&parsed), vec!["real"]);
    }

    #[test]
    fn test_unterminated_dollar_quote() {
        let err = TemplateParser::parse("SELECT $tag$ never closed $other$").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnterminatedDollarQuote {
                position: 7,
                tag: "tag".to_string(),
            }
        );
    }

    #[test]
    fn test_positional_dollar_is_text() {
        let parsed = TemplateParser::parse("SELECT $1, :x, price$usd FROM t").unwrap();
        assert_eq!(names(&parsed), vec!["x"]);
        assert_eq!(parsed.rewritten, "SELECT $1, $1, price$usd FROM t");
    }

    #[test]
    fn test_cast_is_not_a_variable() {
        let parsed = TemplateParser::parse("SELECT :id::int8, now()::date").unwrap();
        assert_eq!(names(&parsed), vec!["id"]);
        assert_eq!(parsed.rewritten, "SELECT $1::int8, now()::date");
    }

    #[test]
    fn test_property_path() {
        let parsed =
            TemplateParser::parse("UPDATE t SET city = :row.address.city WHERE id = :row.id").unwrap();
        assert_eq!(names(&parsed), vec!["row.address.city", "row.id"]);

        let var = &parsed.variables[0];
        assert_eq!(var.key(), "row");
        assert_eq!(var.property_path(), vec!["address", "city"]);
        assert!(var.has_property_path());
        assert_eq!(parsed.rewritten, "UPDATE t SET city = $1 WHERE id = $2");
    }

    #[test]
    fn test_trailing_dot_not_consumed() {
        let parsed = TemplateParser::parse("SELECT :a. FROM t").unwrap();
        assert_eq!(names(&parsed), vec!["a"]);
        assert_eq!(parsed.rewritten, "SELECT $1. FROM t");
    }

    #[test]
    fn test_comments_and_identifiers() {
        let parsed = TemplateParser::parse(
            "SELECT \"col:x\" -- :y in a comment\nFROM t /* :z /* nested */ */ WHERE a = :w",
        )
        .unwrap();
        assert_eq!(names(&parsed), vec!["w"]);

        let err = TemplateParser::parse("SELECT /* open").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedComment { position: 7 });

        let err = TemplateParser::parse("SELECT \"open").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedQuotedIdentifier { position: 7 });
    }

    #[test]
    fn test_escape_string() {
        let parsed = TemplateParser::parse("SELECT E'it\\'s :no', :yes").unwrap();
        assert_eq!(names(&parsed), vec!["yes"]);
    }

    #[test]
    fn test_non_ascii_text() {
        let parsed = TemplateParser::parse("SELECT 'łódź', :x -- żółw").unwrap();
        assert_eq!(names(&parsed), vec!["x"]);
        assert_eq!(parsed.rewritten, "SELECT 'łódź', $1 -- żółw");
    }
}
