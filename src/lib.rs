//! Rule-driven event router.
//!
//! Events carry a dot-separated subject, string headers and a JSON payload.
//! Routing rules pair a subject pattern with an optional filter (a simple
//! field-equality map or an NREL expression) and a list of forward targets.
//! For each event the dispatcher returns the targets of every matching rule,
//! in rule insertion order.
//!
//! # Data Flow
//! ```text
//! Event ─▶ Dispatcher ─▶ RuleRegistry snapshot ─▶ subject index
//!                │                                   │
//!                │       candidate rules ◀───────────┘
//!                ▼
//!          filter evaluation (expr) ─▶ template expansion ─▶ [ForwardTarget]
//!                                                                 │
//!                                          forward::Forwarder ◀───┘
//! ```

// Core subsystems
pub mod event;
pub mod expr;
pub mod routing;
pub mod rules;

// Delivery
pub mod forward;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::RouterConfig;
pub use event::Event;
pub use expr::{Compiler, ExecutionBudget, FunctionRegistry, Value};
pub use forward::{Forwarder, ForwarderRegistry, RouterService};
pub use lifecycle::{RouterRuntime, Shutdown};
pub use routing::{Dispatcher, ForwardTarget, MatchResult};
pub use rules::{RuleCommand, RuleRegistry, RuleSpec};
