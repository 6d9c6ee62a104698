//! Event → forward target decision.
//!
//! # Responsibilities
//! - Take one registry snapshot per event
//! - Match subject patterns, then evaluate filters of matching rules only
//! - Expand target templates and collect targets in rule order
//! - Count attempts, matches, budget overruns and evaluation errors
//!
//! # Design Decisions
//! - Fan-out: every matching rule contributes its targets
//! - Evaluation errors are non-matches for that rule only
//! - Deterministic for a given snapshot and event

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;
use crate::expr::eval::ExecutionBudget;
use crate::observability::metrics::RouterCounters;
use crate::routing::cancel::CancelToken;
use crate::rules::registry::RuleRegistry;
use crate::rules::rule::RoutingRule;

/// A fully resolved delivery instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardTarget {
    pub route_id: String,
    pub kind: String,
    pub destination: String,
    pub resolved_fields: BTreeMap<String, String>,
}

/// Targets contributed by one matching rule.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: Arc<RoutingRule>,
    pub targets: Vec<ForwardTarget>,
}

/// Per-rule routing outcome for one event.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub event_id: Uuid,
    /// Revision of the snapshot the decision was made against.
    pub revision: u64,
    pub matches: Vec<RuleMatch>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn route_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.rule.route_id()).collect()
    }

    pub fn targets(&self) -> impl Iterator<Item = &ForwardTarget> {
        self.matches.iter().flat_map(|m| m.targets.iter())
    }

    pub fn into_targets(self) -> Vec<ForwardTarget> {
        self.matches.into_iter().flat_map(|m| m.targets).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("routing cancelled")]
    Cancelled,

    #[error("routing exceeded deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("routing worker failed: {0}")]
    Worker(String),
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<RuleRegistry>,
    budget: ExecutionBudget,
    counters: Arc<RouterCounters>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RuleRegistry>, budget: ExecutionBudget) -> Self {
        let counters = registry.counters().clone();
        Self {
            registry,
            budget,
            counters,
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    /// Ordered forward targets for an event.
    pub fn route(&self, event: &Event) -> Vec<ForwardTarget> {
        self.match_event(event).into_targets()
    }

    /// Routing outcome grouped by matching rule.
    pub fn match_event(&self, event: &Event) -> MatchResult {
        match self.decide(event, || false) {
            Some(result) => result,
            None => MatchResult {
                event_id: event.id(),
                revision: self.registry.revision(),
                matches: Vec::new(),
            },
        }
    }

    /// Like [`route`](Self::route), checking `token` between rules. Partial
    /// output is discarded when cancelled.
    pub fn route_cancellable(
        &self,
        event: &Event,
        token: &CancelToken,
    ) -> Result<Vec<ForwardTarget>, DispatchError> {
        match self.decide(event, || token.is_cancelled()) {
            Some(result) => Ok(result.into_targets()),
            None => {
                self.counters.cancelled();
                tracing::debug!(event_id = %event.id(), "Routing cancelled");
                Err(DispatchError::Cancelled)
            }
        }
    }

    /// Route on the blocking pool and cancel the decision at `timeout`.
    pub async fn route_with_timeout(
        self: &Arc<Self>,
        event: Arc<Event>,
        timeout: Duration,
    ) -> Result<Vec<ForwardTarget>, DispatchError> {
        let token = CancelToken::new();
        let worker_token = token.clone();
        let dispatcher = Arc::clone(self);
        let event_id = event.id();

        let handle = tokio::task::spawn_blocking(move || {
            dispatcher.route_cancellable(&event, &worker_token)
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DispatchError::Worker(e.to_string())),
            Err(_) => {
                token.cancel();
                tracing::warn!(
                    event_id = %event_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Routing deadline exceeded"
                );
                Err(DispatchError::DeadlineExceeded {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn decide(&self, event: &Event, cancelled: impl Fn() -> bool) -> Option<MatchResult> {
        let start = Instant::now();
        let snapshot = self.registry.snapshot();
        let subject = event.subject();
        let mut matches = Vec::new();

        for rule in snapshot.candidates(subject) {
            if cancelled() {
                return None;
            }
            if !rule.pattern().matches(subject) {
                continue;
            }

            let route_id = rule.route_id();
            self.counters.match_attempt(route_id);
            match rule.filter().evaluate(event, &self.budget) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) if e.is_budget() => {
                    self.counters.budget_exceeded(route_id);
                    tracing::warn!(event_id = %event.id(), route_id = %route_id, error = %e, "Filter evaluation aborted");
                    continue;
                }
                Err(e) => {
                    self.counters.eval_error(route_id);
                    tracing::debug!(event_id = %event.id(), route_id = %route_id, error = %e, "Filter evaluation failed");
                    continue;
                }
            }

            self.counters.rule_matched(route_id);
            matches.push(RuleMatch {
                rule: Arc::clone(rule),
                targets: expand_targets(rule, event),
            });
        }

        let elapsed = self.counters.event_routed(start);
        tracing::debug!(
            event_id = %event.id(),
            subject = %subject,
            revision = snapshot.revision(),
            matched = matches.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "Event routed"
        );

        Some(MatchResult {
            event_id: event.id(),
            revision: snapshot.revision(),
            matches,
        })
    }
}

fn expand_targets(rule: &RoutingRule, event: &Event) -> Vec<ForwardTarget> {
    let route_id = rule.route_id();
    rule.targets()
        .iter()
        .map(|t| ForwardTarget {
            route_id: route_id.to_string(),
            kind: t.kind.clone(),
            destination: t.destination.render(event, route_id),
            resolved_fields: t
                .fields
                .iter()
                .map(|(name, tpl)| (name.clone(), tpl.render(event, route_id)))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile::Compiler;
    use crate::rules::rule::RuleSpec;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(RuleRegistry::new(Compiler::new(), Arc::new(RouterCounters::new())));
        Dispatcher::new(registry, ExecutionBudget::default())
    }

    #[test]
    fn test_fan_out_in_rule_order() {
        let d = dispatcher();
        d.registry()
            .add(RuleSpec::new("b", "orders.>").with_target("echo", "all-orders"))
            .unwrap();
        d.registry()
            .add(RuleSpec::new("a", "*.created").with_target("echo", "created"))
            .unwrap();
        d.registry()
            .add(RuleSpec::new("c", "users.*").with_target("echo", "users"))
            .unwrap();

        let event = Event::from_json("orders.created", json!({}));
        let result = d.match_event(&event);
        assert_eq!(result.route_ids(), vec!["b", "a"]);
        let dests: Vec<_> = d.route(&event).into_iter().map(|t| t.destination).collect();
        assert_eq!(dests, vec!["all-orders", "created"]);
    }

    #[test]
    fn test_subject_mismatch_skips_filter() {
        let d = dispatcher();
        d.registry()
            .add(
                RuleSpec::new("r", "a.b")
                    .with_filter_expr("payload.x == 1")
                    .with_target("echo", "x"),
            )
            .unwrap();
        d.route(&Event::from_json("a.c", json!({"x": 1})));
        assert_eq!(d.registry().counters().snapshot().match_attempts, 0);
        assert!(!d.route(&Event::from_json("a.b", json!({"x": 1}))).is_empty());
        assert_eq!(d.registry().counters().snapshot().match_attempts, 1);
    }

    #[test]
    fn test_error_is_non_match_for_that_rule_only() {
        let d = dispatcher();
        d.registry()
            .add(
                RuleSpec::new("bad", "a")
                    .with_filter_expr("payload.name > 5")
                    .with_target("echo", "bad"),
            )
            .unwrap();
        d.registry()
            .add(RuleSpec::new("good", "a").with_target("echo", "good"))
            .unwrap();
        let targets = d.route(&Event::from_json("a", json!({"name": "x"})));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].route_id, "good");
        assert_eq!(d.registry().counters().snapshot().eval_errors, 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let d = dispatcher();
        d.registry()
            .add(RuleSpec::new("r", "a").with_target("echo", "x"))
            .unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = d
            .route_cancellable(&Event::from_json("a", json!({})), &token)
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
        assert_eq!(d.registry().counters().snapshot().cancelled, 1);
    }

    #[tokio::test]
    async fn test_route_with_timeout() {
        let d = Arc::new(dispatcher());
        d.registry()
            .add(RuleSpec::new("r", "a").with_target("echo", "{{subject}}"))
            .unwrap();
        let event = Arc::new(Event::from_json("a", json!({})));
        let targets = d
            .route_with_timeout(event, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(targets[0].destination, "a");
    }
}
