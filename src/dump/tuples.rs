use std::iter::Peekable;
use std::str::CharIndices;

use super::row::{RawValue, Row};

/// Extracts row tuples from the text following `VALUES`
///
/// Handles `(..),(..)` lists with an optional trailing `;`, quoted strings with
/// doubled-quote and (optionally) MySQL backslash escaping, `NULL`, charset
/// introducers such as `_binary'..'`, and bare tokens that may contain nested
/// parentheses.
pub struct TupleParser<'a> {
    text: &'a str,
    chars: Peekable<CharIndices<'a>>,
    backslash_escapes: bool,
}

impl<'a> TupleParser<'a> {
    pub fn new(text: &'a str, backslash_escapes: bool) -> Self {
        Self {
            text,
            chars: text.char_indices().peekable(),
            backslash_escapes,
        }
    }

    /// Parse every tuple in the text
    pub fn parse_all(mut self) -> Result<Vec<Row>, String> {
        let mut rows = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.next() {
                Some((_, '(')) => rows.push(self.parse_tuple()?),
                Some((pos, c)) => return Err(format!("expected '(' at position {pos}, found '{c}'")),
                None if rows.is_empty() => return Err("no row tuples after VALUES".to_string()),
                None => return Err("unexpected end of statement after ','".to_string()),
            }

            self.skip_whitespace();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ';')) | None => break,
                Some((pos, c)) => {
                    return Err(format!("expected ',' or ';' at position {pos}, found '{c}'"));
                }
            }
        }

        self.skip_whitespace();
        if let Some((pos, _)) = self.chars.peek() {
            return Err(format!(
                "unexpected trailing content at position {}: {}",
                pos,
                preview(&self.text[*pos..])
            ));
        }
        Ok(rows)
    }

    /// Parse the fields of one tuple; the opening parenthesis is consumed
    fn parse_tuple(&mut self) -> Result<Row, String> {
        let mut values = Vec::new();
        loop {
            values.push(self.parse_value()?);
            self.skip_whitespace();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ')')) => return Ok(Row::new(values)),
                Some((pos, c)) => {
                    return Err(format!("expected ',' or ')' at position {pos}, found '{c}'"));
                }
                None => return Err("unterminated row tuple".to_string()),
            }
        }
    }

    fn parse_value(&mut self) -> Result<RawValue, String> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some((_, q @ ('\'' | '"'))) => {
                self.chars.next();
                self.parse_quoted(q).map(RawValue::Quoted)
            }
            Some((start, _)) => self.parse_bare(start),
            None => Err("unterminated row tuple".to_string()),
        }
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, String> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            if c == quote {
                if self.chars.peek().is_some_and(|(_, n)| *n == quote) {
                    self.chars.next();
                    out.push(quote);
                    continue;
                }
                return Ok(out);
            }
            if c == '\\' && self.backslash_escapes {
                match self.chars.next() {
                    Some((_, e)) => unescape_into(&mut out, e),
                    None => break,
                }
                continue;
            }
            out.push(c);
        }
        Err("unterminated quoted string".to_string())
    }

    /// Read an unquoted token up to the next top-level ',' or ')'
    fn parse_bare(&mut self, start: usize) -> Result<RawValue, String> {
        let mut depth = 0u32;
        let mut end = self.text.len();

        while let Some(&(pos, c)) = self.chars.peek() {
            match c {
                ',' | ')' if depth == 0 => {
                    end = pos;
                    break;
                }
                '(' => depth += 1,
                ')' => depth -= 1,
                '\'' | '"' => {
                    let token = self.text[start..pos].trim();
                    if depth == 0 && is_charset_introducer(token) {
                        self.chars.next();
                        return self.parse_quoted(c).map(RawValue::Quoted);
                    }
                    // Quoted content inside an expression, e.g. X'4142' or f('a,b')
                    self.chars.next();
                    self.parse_quoted(c)?;
                    continue;
                }
                _ => {}
            }
            self.chars.next();
        }

        let token = self.text[start..end].trim();
        if token.is_empty() {
            return Err(format!("empty value at position {start}"));
        }
        if token.eq_ignore_ascii_case("NULL") {
            return Ok(RawValue::Null);
        }
        Ok(RawValue::Bare(token.to_string()))
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            self.chars.next();
        }
    }
}

/// MySQL string escapes; unknown sequences keep the escaped character
fn unescape_into(out: &mut String, escaped: char) {
    match escaped {
        '0' => out.push('\0'),
        'b' => out.push('\u{8}'),
        'n' => out.push('\n'),
        'r' => out.push('\r'),
        't' => out.push('\t'),
        'Z' => out.push('\u{1a}'),
        '%' | '_' => {
            out.push('\\');
            out.push(escaped);
        }
        other => out.push(other),
    }
}

/// `_binary`, `_utf8mb4` and friends
fn is_charset_introducer(token: &str) -> bool {
    token.len() > 1
        && token.starts_with('_')
        && token[1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn preview(text: &str) -> String {
    const MAX: usize = 40;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<Row>, String> {
        TupleParser::new(text, true).parse_all()
    }

    fn bare(s: &str) -> RawValue {
        RawValue::Bare(s.to_string())
    }

    fn quoted(s: &str) -> RawValue {
        RawValue::Quoted(s.to_string())
    }

    #[test]
    fn test_multiple_tuples() {
        let rows = parse(" (1,'A'),(2,'B');").unwrap();
        assert_eq!(
            rows,
            vec![
                Row::new(vec![bare("1"), quoted("A")]),
                Row::new(vec![bare("2"), quoted("B")]),
            ]
        );
    }

    #[test]
    fn test_null_and_whitespace() {
        let rows = parse("( 1 , NULL ,\n 'x' , null )").unwrap();
        assert_eq!(
            rows[0].values,
            vec![bare("1"), RawValue::Null, quoted("x"), RawValue::Null]
        );
    }

    #[test]
    fn test_mysql_escapes() {
        let rows = parse(r"('it\'s','a\\b','line\nbreak','tab\there','100\%','O''Brien')").unwrap();
        assert_eq!(
            rows[0].values,
            vec![
                quoted("it's"),
                quoted("a\\b"),
                quoted("line\nbreak"),
                quoted("tab\there"),
                quoted("100\\%"),
                quoted("O'Brien"),
            ]
        );
    }

    #[test]
    fn test_backslash_is_literal_without_mysql_escapes() {
        let rows = TupleParser::new(r"('C:\temp','it''s')", false)
            .parse_all()
            .unwrap();
        assert_eq!(rows[0].values, vec![quoted(r"C:\temp"), quoted("it's")]);
    }

    #[test]
    fn test_commas_and_parens_inside_values() {
        let rows = parse("(1,'a,b','(x)',ST_GeomFromText('POINT(1 2)'),X'4142')").unwrap();
        assert_eq!(
            rows[0].values,
            vec![
                bare("1"),
                quoted("a,b"),
                quoted("(x)"),
                bare("ST_GeomFromText('POINT(1 2)')"),
                bare("X'4142'"),
            ]
        );
    }

    #[test]
    fn test_charset_introducer_is_dropped() {
        let rows = parse("(1,_binary 'abc',_utf8mb4'd')").unwrap();
        assert_eq!(rows[0].values, vec![bare("1"), quoted("abc"), quoted("d")]);
    }

    #[test]
    fn test_negative_and_float_numbers() {
        let rows = parse("(-1,3.14,1e10)").unwrap();
        assert_eq!(rows[0].values, vec![bare("-1"), bare("3.14"), bare("1e10")]);
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(parse("").is_err());
        assert!(parse("(1,'a'").is_err());
        assert!(parse("(1,'a)").is_err());
        assert!(parse("(1,,2)").is_err());
        assert!(parse("(1) (2)").is_err());
        assert!(parse("(1),").is_err());
        assert!(parse("(1) ON DUPLICATE KEY UPDATE x=1").is_err());
        assert!(parse("(1); garbage").is_err());
    }
}
