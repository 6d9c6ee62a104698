//! Recursive-descent parser for filter expressions.
//!
//! Precedence, lowest first: `OR`, `AND`, `NOT`, predicates
//! (`==`, `LIKE`, `BETWEEN`, `IN`, `IS NULL`, ...), unary minus, primaries.

use crate::expr::ast::{Arg, CompareOp, Expr, PathExpr, PathSegment};
use crate::expr::error::CompileError;
use crate::expr::lexer::{tokenize, Token, TokenKind};
use crate::expr::value::Value;

const MAX_DEPTH: usize = 64;

/// Parse expression text into a syntax tree.
pub fn parse(src: &str) -> Result<Expr, CompileError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens,
        cursor: 0,
        depth: 0,
    };
    if parser.at(&TokenKind::Eof) {
        return Err(CompileError::syntax(0, "empty expression"));
    }
    let expr = parser.parse_or()?;
    if !parser.at(&TokenKind::Eof) {
        let tok = parser.peek_token();
        return Err(CompileError::syntax(
            tok.pos,
            format!("unexpected {}", parser.describe(tok)),
        ));
    }
    Ok(expr)
}

/// Parse a bare field path such as `payload.region` or `headers["x-id"]`.
pub fn parse_path(src: &str) -> Result<PathExpr, CompileError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens,
        cursor: 0,
        depth: 0,
    };
    let tok = parser.advance();
    let root = match tok.kind {
        TokenKind::Ident(name) => name,
        _ => return Err(CompileError::syntax(tok.pos, "expected a field path")),
    };
    let path = parser.parse_segments(root, tok.pos)?;
    if !parser.at(&TokenKind::Eof) {
        let tok = parser.peek_token();
        return Err(CompileError::syntax(tok.pos, "unexpected input after field path"));
    }
    Ok(path)
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl<'s> Parser<'s> {
    fn peek_token(&self) -> &Token {
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.peek_token().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.cursor + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek_token().clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek_token();
            Err(CompileError::syntax(
                tok.pos,
                format!("expected {}, found {}", what, self.describe(tok)),
            ))
        }
    }

    fn describe(&self, tok: &Token) -> String {
        match tok.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("'{}'", &self.src[tok.pos..tok.pos + tok.len]),
        }
    }

    fn enter(&mut self, pos: usize) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CompileError::syntax(pos, "expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let pos = self.peek_token().pos;
        self.enter(pos)?;
        let mut operands = vec![self.parse_and()?];
        while self.at(&TokenKind::Or) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        self.leave();
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut operands = vec![self.parse_not()?];
        while self.at(&TokenKind::And) {
            self.advance();
            operands.push(self.parse_not()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn parse_not(&mut self) -> Result<Expr, CompileError> {
        if self.at(&TokenKind::Not) {
            let tok = self.advance();
            self.enter(tok.pos)?;
            let operand = self.parse_not()?;
            self.leave();
            return Ok(Expr::Not {
                operand: Box::new(operand),
                pos: tok.pos,
            });
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, CompileError> {
        if self.at(&TokenKind::Exists) {
            self.advance();
            let parenthesized = self.at(&TokenKind::LParen);
            if parenthesized {
                self.advance();
            }
            let tok = self.advance();
            let root = match tok.kind {
                TokenKind::Ident(name) => name,
                _ => {
                    return Err(CompileError::syntax(tok.pos, "EXISTS requires a field path"));
                }
            };
            let path = self.parse_segments(root, tok.pos)?;
            if parenthesized {
                self.expect(TokenKind::RParen, "')'")?;
            }
            return Ok(Expr::Exists(path));
        }

        let lhs = self.parse_operand()?;
        let op_pos = self.peek_token().pos;

        let compare = match self.peek() {
            TokenKind::Eq => Some(CompareOp::Eq),
            TokenKind::Ne => Some(CompareOp::Ne),
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Ge => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = compare {
            self.advance();
            let rhs = self.parse_operand()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos: op_pos,
            });
        }

        let negated = self.at(&TokenKind::Not)
            && matches!(
                self.peek_at(1),
                TokenKind::Like | TokenKind::Matches | TokenKind::Between | TokenKind::In
            );
        if negated {
            self.advance();
        }

        match self.peek().clone() {
            TokenKind::Like | TokenKind::Matches => {
                let is_like = self.at(&TokenKind::Like);
                self.advance();
                let tok = self.advance();
                let pattern = match tok.kind {
                    TokenKind::Str(s) => s,
                    _ => {
                        let what = if is_like { "LIKE" } else { "MATCHES" };
                        return Err(CompileError::syntax(
                            tok.pos,
                            format!("{} requires a string literal pattern", what),
                        ));
                    }
                };
                let operand = Box::new(lhs);
                Ok(if is_like {
                    Expr::Like {
                        operand,
                        pattern,
                        negated,
                        pos: op_pos,
                    }
                } else {
                    Expr::Matches {
                        operand,
                        pattern,
                        negated,
                        pos: op_pos,
                    }
                })
            }
            TokenKind::Between => {
                self.advance();
                let low = self.parse_operand()?;
                self.expect(TokenKind::And, "AND in BETWEEN")?;
                let high = self.parse_operand()?;
                Ok(Expr::Between {
                    operand: Box::new(lhs),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                    pos: op_pos,
                })
            }
            TokenKind::In => {
                self.advance();
                let close = match self.peek() {
                    TokenKind::LParen => TokenKind::RParen,
                    TokenKind::LBracket => TokenKind::RBracket,
                    _ => {
                        let tok = self.peek_token();
                        return Err(CompileError::syntax(tok.pos, "IN requires a parenthesized list"));
                    }
                };
                self.advance();
                let mut set = Vec::new();
                if !self.at(&close) {
                    loop {
                        set.push(self.parse_operand()?);
                        if self.at(&TokenKind::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(close, "closing bracket of IN list")?;
                Ok(Expr::In {
                    operand: Box::new(lhs),
                    set,
                    negated,
                    pos: op_pos,
                })
            }
            TokenKind::Is => {
                self.advance();
                let negated = self.at(&TokenKind::Not);
                if negated {
                    self.advance();
                }
                self.expect(TokenKind::Null, "NULL after IS")?;
                Ok(Expr::IsNull {
                    operand: Box::new(lhs),
                    negated,
                    pos: op_pos,
                })
            }
            _ => Ok(lhs),
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, CompileError> {
        if self.at(&TokenKind::Minus) {
            let tok = self.advance();
            self.enter(tok.pos)?;
            let operand = self.parse_operand()?;
            self.leave();
            return Ok(match operand {
                Expr::Literal {
                    value: Value::Number(n),
                    ..
                } => Expr::Literal {
                    value: Value::Number(-n),
                    pos: tok.pos,
                },
                other => Expr::Neg {
                    operand: Box::new(other),
                    pos: tok.pos,
                },
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let tok = self.advance();
        let pos = tok.pos;
        let literal = |value: Value| -> Result<Expr, CompileError> { Ok(Expr::Literal { value, pos }) };

        match tok.kind {
            TokenKind::Number(n) => literal(Value::Number(n)),
            TokenKind::Str(s) => literal(Value::String(s)),
            TokenKind::True => literal(Value::Bool(true)),
            TokenKind::False => literal(Value::Bool(false)),
            TokenKind::Null => literal(Value::Null),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if self.at(&TokenKind::LParen) {
                    self.parse_call(name, pos)
                } else {
                    Ok(Expr::Path(self.parse_segments(name, pos)?))
                }
            }
            _ => Err(CompileError::syntax(
                pos,
                format!("expected an expression, found {}", self.describe(&tok)),
            )),
        }
    }

    fn parse_segments(&mut self, root: String, pos: usize) -> Result<PathExpr, CompileError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let tok = self.advance();
                    let key = match &tok.kind {
                        TokenKind::Ident(name) => name.clone(),
                        other => match other.keyword_text() {
                            Some(_) => self.src[tok.pos..tok.pos + tok.len].to_string(),
                            None => {
                                return Err(CompileError::syntax(
                                    tok.pos,
                                    format!("expected a field name, found {}", self.describe(&tok)),
                                ))
                            }
                        },
                    };
                    segments.push(PathSegment::Key(key));
                }
                TokenKind::LBracket => {
                    self.advance();
                    let tok = self.advance();
                    let segment = match tok.kind {
                        TokenKind::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                            PathSegment::Index(n as usize)
                        }
                        TokenKind::Str(key) => PathSegment::Key(key),
                        _ => {
                            return Err(CompileError::syntax(
                                tok.pos,
                                "index must be a non-negative integer or a quoted key",
                            ))
                        }
                    };
                    self.expect(TokenKind::RBracket, "']'")?;
                    segments.push(segment);
                }
                _ => break,
            }
        }
        Ok(PathExpr {
            root,
            segments,
            pos,
        })
    }

    fn parse_call(&mut self, name: String, pos: usize) -> Result<Expr, CompileError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let is_lambda = matches!(self.peek(), TokenKind::Ident(_))
                    && matches!(self.peek_at(1), TokenKind::Arrow);
                if is_lambda {
                    let tok = self.advance();
                    let param = match tok.kind {
                        TokenKind::Ident(p) => p,
                        _ => unreachable!("checked above"),
                    };
                    self.advance();
                    let body = self.parse_or()?;
                    args.push(Arg::Lambda {
                        param,
                        body,
                        pos: tok.pos,
                    });
                } else {
                    args.push(Arg::Expr(self.parse_or()?));
                }
                if self.at(&TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' to close the argument list")?;
        Ok(Expr::Call { name, args, pos })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(root: &str, keys: &[&str]) -> PathExpr {
        PathExpr {
            root: root.to_string(),
            segments: keys.iter().map(|k| PathSegment::Key(k.to_string())).collect(),
            pos: 0,
        }
    }

    #[test]
    fn test_precedence_not_and_or() {
        let expr = parse("a OR b AND NOT c").unwrap();
        match expr {
            Expr::Or(ops) => {
                assert_eq!(ops.len(), 2);
                match &ops[1] {
                    Expr::And(inner) => assert!(matches!(inner[1], Expr::Not { .. })),
                    other => panic!("expected AND, got {:?}", other),
                }
            }
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_override() {
        let expr = parse("(a OR b) AND c").unwrap();
        match expr {
            Expr::And(ops) => assert!(matches!(ops[0], Expr::Or(_))),
            other => panic!("expected AND, got {:?}", other),
        }
    }

    #[test]
    fn test_indexed_path() {
        let expr = parse("payload.items[0].x == 1").unwrap();
        match expr {
            Expr::Compare { lhs, .. } => match *lhs {
                Expr::Path(p) => assert_eq!(
                    p.segments,
                    vec![
                        PathSegment::Key("items".into()),
                        PathSegment::Index(0),
                        PathSegment::Key("x".into())
                    ]
                ),
                other => panic!("expected path, got {:?}", other),
            },
            other => panic!("expected compare, got {:?}", other),
        }
    }

    #[test]
    fn test_predicates() {
        assert!(matches!(parse("payload.name LIKE 'a*'").unwrap(), Expr::Like { negated: false, .. }));
        assert!(matches!(parse("payload.name NOT LIKE 'a*'").unwrap(), Expr::Like { negated: true, .. }));
        assert!(matches!(parse("payload.n BETWEEN 1 AND 5").unwrap(), Expr::Between { .. }));
        assert!(matches!(parse("payload.c IN ('a', 'b')").unwrap(), Expr::In { .. }));
        assert!(matches!(parse("payload.c NOT IN ['a']").unwrap(), Expr::In { negated: true, .. }));
        assert!(matches!(parse("payload.c IS NOT NULL").unwrap(), Expr::IsNull { negated: true, .. }));
        assert!(matches!(parse("EXISTS payload.c").unwrap(), Expr::Exists(_)));
        assert!(matches!(parse("exists(payload.c)").unwrap(), Expr::Exists(_)));
    }

    #[test]
    fn test_between_binds_its_own_and() {
        let expr = parse("payload.n BETWEEN 1 AND 5 AND payload.ok == true").unwrap();
        match expr {
            Expr::And(ops) => {
                assert_eq!(ops.len(), 2);
                assert!(matches!(ops[0], Expr::Between { .. }));
            }
            other => panic!("expected AND, got {:?}", other),
        }
    }

    #[test]
    fn test_lambda_argument() {
        let expr = parse("any(payload.items, i => i.price > 10)").unwrap();
        match expr {
            Expr::Call { name, args, .. } => {
                assert_eq!(name, "any");
                assert!(matches!(&args[1], Arg::Lambda { param, .. } if param == "i"));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_literal_folded() {
        match parse("payload.n > -5").unwrap() {
            Expr::Compare { rhs, .. } => {
                assert!(matches!(*rhs, Expr::Literal { value: Value::Number(n), .. } if n == -5.0))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_keyword_as_field_name() {
        match parse("payload.in == 1").unwrap() {
            Expr::Compare { lhs, .. } => match *lhs {
                Expr::Path(p) => assert_eq!(p.segments, path("payload", &["in"]).segments),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        for (src, expected_pos) in [
            ("", 0),
            ("a ==", 4),
            ("a == 1 b", 7),
            ("(a == 1", 7),
            ("a LIKE 5", 7),
            ("a IS 5", 5),
        ] {
            match parse(src) {
                Err(CompileError::Syntax { position, .. }) => {
                    assert_eq!(position, expected_pos, "source {:?}", src)
                }
                other => panic!("expected syntax error for {:?}, got {:?}", src, other),
            }
        }
    }

    #[test]
    fn test_depth_limit() {
        let src = format!("{}a{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(parse(&src), Err(CompileError::Syntax { .. })));
    }

    #[test]
    fn test_parse_path() {
        let p = parse_path("headers[\"content-type\"]").unwrap();
        assert_eq!(p.root, "headers");
        assert_eq!(p.segments, vec![PathSegment::Key("content-type".into())]);
        assert!(parse_path("payload.a ==").is_err());
    }
}
