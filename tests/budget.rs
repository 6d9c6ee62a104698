//! Execution budget enforcement during routing.

use std::sync::Arc;
use std::time::Duration;

use event_router::config::RouterConfig;
use event_router::expr::FunctionRegistry;
use event_router::forward::ForwarderRegistry;
use event_router::routing::DispatchError;
use event_router::{Event, RouterRuntime};
use serde_json::json;

mod common;

fn tight_runtime(max_node_visits: u64) -> RouterRuntime {
    let mut config = RouterConfig::default();
    config.evaluation.max_node_visits = max_node_visits;
    RouterRuntime::build(&config, FunctionRegistry::new(), ForwarderRegistry::with_echo())
}

#[test]
fn test_budget_overrun_is_non_match() {
    let runtime = tight_runtime(50);
    runtime
        .registry
        .add(common::echo_rule("heavy", "metrics.>").with_filter_expr("all(payload.samples, s => s >= 0)"))
        .unwrap();
    runtime.registry.add(common::echo_rule("light", "metrics.>")).unwrap();

    let samples: Vec<u32> = (0..1_000).collect();
    let event = common::event("metrics.cpu", json!({ "samples": samples }));
    let ids: Vec<_> = runtime.dispatcher.route(&event).into_iter().map(|t| t.route_id).collect();

    assert_eq!(ids, vec!["light"]);
    let totals = runtime.counters.snapshot();
    assert_eq!(totals.budget_exceeded, 1);
    assert_eq!(totals.eval_errors, 0);
    assert_eq!(runtime.counters.route_stats("heavy").map(|s| s.matches), Some(0));
}

#[test]
fn test_budget_fits_small_payloads() {
    let runtime = tight_runtime(50);
    runtime
        .registry
        .add(common::echo_rule("heavy", "metrics.>").with_filter_expr("all(payload.samples, s => s >= 0)"))
        .unwrap();

    let event = common::event("metrics.cpu", json!({ "samples": [1, 2, 3] }));
    assert_eq!(runtime.dispatcher.route(&event).len(), 1);
    assert_eq!(runtime.counters.snapshot().budget_exceeded, 0);
}

#[test]
fn test_budget_error_not_masked_by_or() {
    let runtime = tight_runtime(50);
    runtime
        .registry
        .add(
            common::echo_rule("r", "metrics.>")
                .with_filter_expr("any(payload.samples, s => s < 0) OR payload.force == true"),
        )
        .unwrap();

    let samples: Vec<u32> = (0..1_000).collect();
    let event = common::event("metrics.cpu", json!({ "samples": samples, "force": false }));
    assert!(runtime.dispatcher.route(&event).is_empty());
    assert_eq!(runtime.counters.snapshot().budget_exceeded, 1);
}

#[tokio::test]
async fn test_route_timeout_discards_everything() {
    let mut functions = FunctionRegistry::new();
    functions
        .register("slow", 1, |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(true.into())
        })
        .unwrap();
    let runtime = common::runtime_with(functions);
    runtime.registry.add(common::echo_rule("fast", "jobs.>")).unwrap();
    runtime
        .registry
        .add(common::echo_rule("slow", "jobs.>").with_filter_expr("slow(payload.x)"))
        .unwrap();

    let event = Arc::new(Event::from_json("jobs.run", json!({"x": 1})));
    let result = runtime
        .dispatcher
        .route_with_timeout(event, Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(DispatchError::DeadlineExceeded { .. })));
}
