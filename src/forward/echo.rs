use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::Event;
use crate::forward::{ForwardError, Forwarder};
use crate::routing::dispatcher::ForwardTarget;

/// Logs each delivery instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct EchoForwarder {
    delivered: AtomicU64,
}

impl EchoForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Forwarder for EchoForwarder {
    fn kind(&self) -> &str {
        "echo"
    }

    fn deliver(&self, event: &Event, target: &ForwardTarget) -> Result<(), ForwardError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            event_id = %event.id(),
            subject = %event.subject(),
            route_id = %target.route_id,
            destination = %target.destination,
            fields = ?target.resolved_fields,
            "Echo delivery"
        );
        Ok(())
    }
}
