//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use event_router::config::RouterConfig;
use event_router::expr::FunctionRegistry;
use event_router::forward::{ForwardError, Forwarder, ForwarderRegistry};
use event_router::routing::ForwardTarget;
use event_router::{Event, RouterRuntime, RuleSpec};

/// Forwarder that keeps every delivered target.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    delivered: Mutex<Vec<ForwardTarget>>,
}

impl RecordingForwarder {
    pub fn delivered(&self) -> Vec<ForwardTarget> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Forwarder for RecordingForwarder {
    fn kind(&self) -> &str {
        "record"
    }

    fn deliver(&self, _event: &Event, target: &ForwardTarget) -> Result<(), ForwardError> {
        self.delivered.lock().unwrap().push(target.clone());
        Ok(())
    }
}

/// Runtime with default config, the echo forwarder and the given host
/// functions.
pub fn runtime_with(functions: FunctionRegistry) -> RouterRuntime {
    RouterRuntime::build(&RouterConfig::default(), functions, ForwarderRegistry::with_echo())
}

pub fn runtime() -> RouterRuntime {
    runtime_with(FunctionRegistry::new())
}

/// Host function registry with `tally(x)` that counts its calls and returns `true`.
pub fn counting_functions() -> (FunctionRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut functions = FunctionRegistry::new();
    functions
        .register("tally", 1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true.into())
        })
        .unwrap();
    (functions, calls)
}

pub fn echo_rule(route_id: &str, subject: &str) -> RuleSpec {
    RuleSpec::new(route_id, subject).with_target("echo", format!("out/{route_id}"))
}

pub fn event(subject: &str, payload: serde_json::Value) -> Event {
    Event::from_json(subject, payload)
}
