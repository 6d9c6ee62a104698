//! Output side: hand forward targets to delivery collaborators.
//!
//! # Data Flow
//! ```text
//! Event → Dispatcher::route → [ForwardTarget]
//!     → ForwarderRegistry (lookup by target kind)
//!     → Forwarder::deliver
//!     → DeliveryReport
//! ```
//!
//! # Design Decisions
//! - Transports live outside this crate; they plug in through the
//!   [`Forwarder`] trait keyed by target `kind`
//! - A failed delivery is reported, never retried here

pub mod echo;
pub mod service;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::event::Event;
use crate::routing::dispatcher::ForwardTarget;

pub use echo::EchoForwarder;
pub use service::{DeliveryReport, FailedDelivery, RouterService};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("no forwarder registered for kind '{0}'")]
    UnknownKind(String),

    #[error("delivery to '{destination}' rejected: {reason}")]
    Rejected { destination: String, reason: String },

    #[error("forwarder unavailable: {0}")]
    Unavailable(String),
}

/// Delivery contract implemented by transport adapters.
pub trait Forwarder: Send + Sync + fmt::Debug {
    /// Target kind this forwarder handles, e.g. `http` or `nats`.
    fn kind(&self) -> &str;

    fn deliver(&self, event: &Event, target: &ForwardTarget) -> Result<(), ForwardError>;
}

#[derive(Debug, Clone, Default)]
pub struct ForwarderRegistry {
    forwarders: HashMap<String, Arc<dyn Forwarder>>,
}

impl ForwarderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `echo` forwarder.
    pub fn with_echo() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoForwarder::new()));
        registry
    }

    /// Register a forwarder under its kind, replacing any previous one.
    pub fn register(&mut self, forwarder: Arc<dyn Forwarder>) {
        let kind = forwarder.kind().to_string();
        if self.forwarders.insert(kind.clone(), forwarder).is_some() {
            tracing::warn!(kind = %kind, "Forwarder replaced");
        }
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Forwarder>> {
        self.forwarders.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.forwarders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn deliver(&self, event: &Event, target: &ForwardTarget) -> Result<(), ForwardError> {
        self.get(&target.kind)
            .ok_or_else(|| ForwardError::UnknownKind(target.kind.clone()))?
            .deliver(event, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_unknown_kind() {
        let registry = ForwarderRegistry::with_echo();
        assert_eq!(registry.kinds(), vec!["echo"]);
        let target = ForwardTarget {
            route_id: "r".into(),
            kind: "kafka".into(),
            destination: "t".into(),
            resolved_fields: BTreeMap::new(),
        };
        let event = Event::from_json("a", json!({}));
        assert_eq!(
            registry.deliver(&event, &target),
            Err(ForwardError::UnknownKind("kafka".into()))
        );
    }
}
