//! Compile-time and evaluation-time errors.

use thiserror::Error;

/// Rejection of a filter expression at rule-definition time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Malformed expression text.
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Statically detectable type mismatch.
    #[error("type error at {position}: {message}")]
    Type { position: usize, message: String },
}

impl CompileError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(position: usize, message: impl Into<String>) -> Self {
        CompileError::Type {
            position,
            message: message.into(),
        }
    }

    pub fn position(&self) -> usize {
        match self {
            CompileError::Syntax { position, .. } | CompileError::Type { position, .. } => *position,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Syntax { .. } => "syntax",
            CompileError::Type { .. } => "type",
        }
    }
}

/// Failure while evaluating a compiled expression against an event.
///
/// Never fatal to routing: the dispatcher turns every variant into a
/// non-match for the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("expected a boolean, found {found}")]
    NotBoolean { found: &'static str },

    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("node visit budget of {limit} exhausted")]
    BudgetExceeded { limit: u64 },

    #[error("evaluation exceeded {limit_ms}ms")]
    Timeout { limit_ms: u64 },
}

impl EvalError {
    pub(crate) fn invalid_argument(function: &str, message: impl Into<String>) -> Self {
        EvalError::InvalidArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Budget and time overruns abort the whole expression; other errors
    /// only falsify the enclosing logical operand.
    pub fn is_budget(&self) -> bool {
        matches!(self, EvalError::BudgetExceeded { .. } | EvalError::Timeout { .. })
    }
}

/// Rejection when registering a host function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    #[error("function name '{0}' is reserved by a built-in")]
    Reserved(String),

    #[error("function name '{0}' is not a valid identifier")]
    InvalidName(String),
}
