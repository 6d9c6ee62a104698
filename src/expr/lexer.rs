//! Tokenizer for filter expressions.
//!
//! Keywords are case-insensitive. Every token records its byte offset so
//! syntax errors can point at the offending input.

use crate::expr::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Like,
    Matches,
    Between,
    In,
    Exists,
    Is,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Arrow,
    Minus,
    Eof,
}

impl TokenKind {
    /// Keyword tokens may still be used as field names after a `.`.
    pub fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Like => "like",
            TokenKind::Matches => "matches",
            TokenKind::Between => "between",
            TokenKind::In => "in",
            TokenKind::Exists => "exists",
            TokenKind::Is => "is",
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
    pub len: usize,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word.to_ascii_uppercase().as_str() {
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        "NULL" => TokenKind::Null,
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "LIKE" => TokenKind::Like,
        "MATCHES" => TokenKind::Matches,
        "BETWEEN" => TokenKind::Between,
        "IN" => TokenKind::In,
        "EXISTS" => TokenKind::Exists,
        "IS" => TokenKind::Is,
        _ => return None,
    };
    Some(kind)
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, CompileError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let simple = |kind: TokenKind, len: usize| Token { kind, pos: start, len };

        let token = match c {
            b'(' => simple(TokenKind::LParen, 1),
            b')' => simple(TokenKind::RParen, 1),
            b'[' => simple(TokenKind::LBracket, 1),
            b']' => simple(TokenKind::RBracket, 1),
            b',' => simple(TokenKind::Comma, 1),
            b'.' => simple(TokenKind::Dot, 1),
            b'-' => simple(TokenKind::Minus, 1),
            b'=' => match bytes.get(i + 1) {
                Some(b'=') => simple(TokenKind::Eq, 2),
                Some(b'>') => simple(TokenKind::Arrow, 2),
                _ => simple(TokenKind::Eq, 1),
            },
            b'!' => match bytes.get(i + 1) {
                Some(b'=') => simple(TokenKind::Ne, 2),
                _ => simple(TokenKind::Not, 1),
            },
            b'<' => match bytes.get(i + 1) {
                Some(b'=') => simple(TokenKind::Le, 2),
                Some(b'>') => simple(TokenKind::Ne, 2),
                _ => simple(TokenKind::Lt, 1),
            },
            b'>' => match bytes.get(i + 1) {
                Some(b'=') => simple(TokenKind::Ge, 2),
                _ => simple(TokenKind::Gt, 1),
            },
            b'&' if bytes.get(i + 1) == Some(&b'&') => simple(TokenKind::And, 2),
            b'|' if bytes.get(i + 1) == Some(&b'|') => simple(TokenKind::Or, 2),
            b'\'' | b'"' => lex_string(src, start)?,
            b'0'..=b'9' => lex_number(src, start)?,
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut end = start;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &src[start..end];
                let kind = keyword(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()));
                Token {
                    kind,
                    pos: start,
                    len: end - start,
                }
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(CompileError::syntax(start, format!("unexpected character '{}'", ch)));
            }
        };

        i = token.pos + token.len;
        tokens.push(token);
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: src.len(),
        len: 0,
    });
    Ok(tokens)
}

fn lex_string(src: &str, start: usize) -> Result<Token, CompileError> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next().ok_or_else(|| CompileError::syntax(start, "expected string"))?;
    let mut out = String::new();

    while let Some((off, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => {
                return Ok(Token {
                    kind: TokenKind::Str(out),
                    pos: start,
                    len: off + c.len_utf8(),
                });
            }
            c => out.push(c),
        }
    }

    Err(CompileError::syntax(start, "unterminated string literal"))
}

fn lex_number(src: &str, start: usize) -> Result<Token, CompileError> {
    let bytes = src.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    // Only treat '.' as a decimal point when a digit follows, so that
    // `items[0].x` still lexes as index + path.
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            end = exp;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }

    let text = &src[start..end];
    let n: f64 = text
        .parse()
        .map_err(|_| CompileError::syntax(start, format!("invalid number '{}'", text)))?;
    Ok(Token {
        kind: TokenKind::Number(n),
        pos: start,
        len: end - start,
    })
}
