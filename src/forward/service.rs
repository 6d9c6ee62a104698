//! Routing plus delivery for one event.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::event::Event;
use crate::forward::ForwarderRegistry;
use crate::routing::dispatcher::{DispatchError, Dispatcher, ForwardTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    pub target: ForwardTarget,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub delivered: Vec<ForwardTarget>,
    pub failed: Vec<FailedDelivery>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn target_count(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

#[derive(Debug)]
pub struct RouterService {
    dispatcher: Arc<Dispatcher>,
    forwarders: ForwarderRegistry,
    route_timeout: Option<Duration>,
}

impl RouterService {
    pub fn new(dispatcher: Arc<Dispatcher>, forwarders: ForwarderRegistry) -> Self {
        Self {
            dispatcher,
            forwarders,
            route_timeout: None,
        }
    }

    /// Bound the routing decision made by [`handle_async`](Self::handle_async).
    pub fn with_route_timeout(mut self, timeout: Duration) -> Self {
        self.route_timeout = Some(timeout);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn forwarders(&self) -> &ForwarderRegistry {
        &self.forwarders
    }

    /// Route `event` and deliver each target in order.
    pub fn handle(&self, event: &Event) -> DeliveryReport {
        let targets = self.dispatcher.route(event);
        self.deliver(event, targets)
    }

    /// Route on the blocking pool, honouring the configured timeout, then
    /// deliver.
    pub async fn handle_async(&self, event: Arc<Event>) -> Result<DeliveryReport, DispatchError> {
        let targets = match self.route_timeout {
            Some(timeout) => {
                self.dispatcher
                    .route_with_timeout(Arc::clone(&event), timeout)
                    .await?
            }
            None => self.dispatcher.route(&event),
        };
        Ok(self.deliver(&event, targets))
    }

    fn deliver(&self, event: &Event, targets: Vec<ForwardTarget>) -> DeliveryReport {
        let mut delivered = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();

        for target in targets {
            match self.forwarders.deliver(event, &target) {
                Ok(()) => delivered.push(target),
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.id(),
                        route_id = %target.route_id,
                        kind = %target.kind,
                        error = %e,
                        "Delivery failed"
                    );
                    failed.push(FailedDelivery {
                        target,
                        error: e.to_string(),
                    });
                }
            }
        }

        DeliveryReport {
            event_id: event.id(),
            delivered,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile::Compiler;
    use crate::expr::eval::ExecutionBudget;
    use crate::observability::metrics::RouterCounters;
    use crate::rules::registry::RuleRegistry;
    use crate::rules::rule::RuleSpec;
    use serde_json::json;

    fn service() -> RouterService {
        let registry = Arc::new(RuleRegistry::new(Compiler::new(), Arc::new(RouterCounters::new())));
        registry
            .add(RuleSpec::new("ok", "a").with_target("echo", "out"))
            .unwrap();
        registry
            .add(RuleSpec::new("lost", "a").with_target("carrier-pigeon", "roof"))
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(registry, ExecutionBudget::default()));
        RouterService::new(dispatcher, ForwarderRegistry::with_echo())
    }

    #[test]
    fn test_handle_reports_failures() {
        let report = service().handle(&Event::from_json("a", json!({})));
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target.route_id, "lost");
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_handle_async_with_timeout() {
        let service = service().with_route_timeout(Duration::from_secs(5));
        let report = service
            .handle_async(Arc::new(Event::from_json("a", json!({}))))
            .await
            .unwrap();
        assert_eq!(report.target_count(), 2);
    }
}
