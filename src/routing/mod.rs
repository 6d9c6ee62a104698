//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Event (subject, headers, payload)
//!     → registry snapshot (consistent rule set)
//!     → subject.rs (pattern match on candidates)
//!     → rule filter (simple map or compiled expression)
//!     → template.rs (expand target placeholders)
//!     → Return: ordered ForwardTargets, grouped per rule in MatchResult
//! ```
//!
//! # Design Decisions
//! - Subject matching uses no regex; patterns compile to token lists
//! - All matching rules contribute (fan-out), in registry order
//! - Deterministic: same snapshot and event always give the same targets

pub mod cancel;
pub mod dispatcher;
pub mod subject;
pub mod template;

pub use cancel::CancelToken;
pub use dispatcher::{DispatchError, Dispatcher, ForwardTarget, MatchResult, RuleMatch};
pub use subject::{PatternError, SubjectPattern};
pub use template::Template;
