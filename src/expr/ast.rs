//! Untyped syntax tree produced by the parser.
//!
//! The compile pass resolves names, checks types and lowers this tree into
//! the evaluation form in [`crate::expr::compile`].

use crate::expr::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A dotted/indexed reference such as `payload.items[0].x`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub root: String,
    pub segments: Vec<PathSegment>,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Value,
        pos: usize,
    },
    Path(PathExpr),
    Neg {
        operand: Box<Expr>,
        pos: usize,
    },
    Not {
        operand: Box<Expr>,
        pos: usize,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: usize,
    },
    Like {
        operand: Box<Expr>,
        pattern: String,
        negated: bool,
        pos: usize,
    },
    Matches {
        operand: Box<Expr>,
        pattern: String,
        negated: bool,
        pos: usize,
    },
    Between {
        operand: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
        pos: usize,
    },
    In {
        operand: Box<Expr>,
        set: Vec<Expr>,
        negated: bool,
        pos: usize,
    },
    Exists(PathExpr),
    IsNull {
        operand: Box<Expr>,
        negated: bool,
        pos: usize,
    },
    Call {
        name: String,
        args: Vec<Arg>,
        pos: usize,
    },
}

/// A call argument; lambdas only appear in quantifier calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Expr(Expr),
    Lambda { param: String, body: Expr, pos: usize },
}

impl Expr {
    pub fn pos(&self) -> usize {
        match self {
            Expr::Literal { pos, .. }
            | Expr::Neg { pos, .. }
            | Expr::Not { pos, .. }
            | Expr::Compare { pos, .. }
            | Expr::Like { pos, .. }
            | Expr::Matches { pos, .. }
            | Expr::Between { pos, .. }
            | Expr::In { pos, .. }
            | Expr::IsNull { pos, .. }
            | Expr::Call { pos, .. } => *pos,
            Expr::Path(path) | Expr::Exists(path) => path.pos,
            Expr::And(ops) | Expr::Or(ops) => ops.first().map(Expr::pos).unwrap_or(0),
        }
    }
}
