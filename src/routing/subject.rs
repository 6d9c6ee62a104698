//! Subject pattern matching.
//!
//! # Responsibilities
//! - Compile dot-delimited subject patterns (`events.user.*`, `orders.>`)
//! - Match concrete subjects against compiled patterns
//!
//! # Design Decisions
//! - `*` matches exactly one token, `>` one or more trailing tokens
//! - Wildcards must occupy a whole token; `>` only as the last token
//! - No regex: matching is a single pass over the tokens

use std::fmt;

use thiserror::Error;

/// A pattern was rejected at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid subject pattern '{pattern}': {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

impl PatternError {
    fn new(pattern: &str, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// One token of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    /// `*`
    Single,
    /// `>`
    Tail,
}

/// A compiled subject pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    source: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    /// Compile a pattern, rejecting malformed wildcard syntax.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::new(pattern, "pattern is empty"));
        }

        let raw: Vec<&str> = pattern.split('.').collect();
        let last = raw.len() - 1;
        let mut tokens = Vec::with_capacity(raw.len());

        for (i, tok) in raw.iter().enumerate() {
            let token = match *tok {
                "" => {
                    return Err(PatternError::new(
                        pattern,
                        format!("empty token at position {}", i),
                    ))
                }
                "*" => Token::Single,
                ">" if i == last => Token::Tail,
                ">" => {
                    return Err(PatternError::new(
                        pattern,
                        "'>' is only allowed as the final token",
                    ))
                }
                lit if lit.contains('*') || lit.contains('>') => {
                    return Err(PatternError::new(
                        pattern,
                        format!("wildcard must occupy a whole token, found '{}'", lit),
                    ))
                }
                lit => Token::Literal(lit.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// Returns true if `subject` is accepted by this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split('.');

        for token in &self.tokens {
            match token {
                Token::Tail => {
                    // Needs at least one remaining token.
                    return parts.next().is_some_and(|p| !p.is_empty())
                        && parts.all(|p| !p.is_empty());
                }
                Token::Single => match parts.next() {
                    Some(p) if !p.is_empty() => {}
                    _ => return false,
                },
                Token::Literal(lit) => match parts.next() {
                    Some(p) if p == lit => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }

    /// The first token when it is a literal; used for candidate indexing.
    pub fn first_literal(&self) -> Option<&str> {
        match self.tokens.first() {
            Some(Token::Literal(lit)) => Some(lit.as_str()),
            _ => None,
        }
    }

    /// The original pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// First token of a concrete subject, for index lookups.
pub fn first_token(subject: &str) -> &str {
    subject.split('.').next().unwrap_or(subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let p = SubjectPattern::compile("events.user.created").unwrap();
        assert!(p.matches("events.user.created"));
        assert!(!p.matches("events.user"));
        assert!(!p.matches("events.user.created.extra"));
        assert!(!p.matches("events.order.created"));
    }

    #[test]
    fn test_single_wildcard() {
        let p = SubjectPattern::compile("events.*.created").unwrap();
        assert!(p.matches("events.user.created"));
        assert!(p.matches("events.order.created"));
        assert!(!p.matches("events.created"));
        assert!(!p.matches("events.a.b.created"));
        assert!(!p.matches("events..created"));
    }

    #[test]
    fn test_tail_wildcard() {
        let p = SubjectPattern::compile("events.>").unwrap();
        assert!(p.matches("events.user"));
        assert!(p.matches("events.user.created.v2"));
        assert!(!p.matches("events"));
        assert!(!p.matches("orders.user"));
    }

    #[test]
    fn test_only_tail() {
        let p = SubjectPattern::compile(">").unwrap();
        assert!(p.matches("a"));
        assert!(p.matches("a.b.c"));
        assert!(p.first_literal().is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in ["", "events..user", "events.us*r", "events.>.user", "a.b>", ".a", "a."] {
            assert!(
                SubjectPattern::compile(bad).is_err(),
                "pattern {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_first_literal() {
        assert_eq!(
            SubjectPattern::compile("events.*").unwrap().first_literal(),
            Some("events")
        );
        assert_eq!(SubjectPattern::compile("*.user").unwrap().first_literal(), None);
        assert_eq!(first_token("events.user.created"), "events");
        assert_eq!(first_token("single"), "single");
    }
}
