//! Rule registry subsystem.
//!
//! # Data Flow
//! ```text
//! RuleSpec (admin API, config file, storage)
//!     → rule.rs (validate, compile pattern/filter/templates)
//!     → registry.rs (serialize writers, assign revision)
//!     → index.rs (rebuild ordered index, swap snapshot)
//!
//! Routing workers:
//!     registry.snapshot() → RuleIndex::candidates(subject)
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; a worker sees one consistent rule set for
//!   the whole event
//! - Expiry is enforced by `sweeper.rs`, not per event

pub mod command;
pub mod error;
pub mod index;
pub mod registry;
pub mod rule;
pub mod sweeper;
pub mod sync;

pub use command::{CommandOutcome, RuleCommand};
pub use error::RegistryError;
pub use index::RuleIndex;
pub use registry::{RuleRegistry, RuleSnapshot};
pub use rule::{RoutingRule, RuleFilter, RuleSource, RuleSpec, TargetSpec};
pub use sweeper::RuleSweeper;
pub use sync::{reconcile_file_rules, SyncReport};
