//! Filter expression language: lexing, parsing, compilation and
//! budgeted evaluation.
//!
//! ```text
//! payload.amount > 100 AND payload.region IN ('EU', 'UK')
//! any(payload.items, i => i.sku LIKE 'GIFT-*')
//! timeSince(date(payload.created_at)) > duration('7d')
//! ```

pub mod ast;
pub mod compile;
pub mod error;
pub mod eval;
pub mod functions;
pub mod glob;
pub mod lexer;
pub mod parser;
pub mod value;

pub use compile::{CompiledExpression, Compiler, FieldRef, FieldRoot};
pub use error::{CompileError, EvalError, FunctionError};
pub use eval::{evaluate, resolve_field, ExecutionBudget};
pub use functions::{FunctionRegistry, HostFunction};
pub use value::Value;
