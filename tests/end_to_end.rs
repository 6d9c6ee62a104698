//! End-to-end routing through the registry, dispatcher and forwarders.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use event_router::expr::FunctionRegistry;
use event_router::forward::{ForwarderRegistry, RouterService};
use event_router::rules::{RuleCommand, RuleSpec};
use event_router::{Event, ExecutionBudget, Dispatcher};
use serde_json::json;

mod common;

#[test]
fn test_user_event_routing() {
    let runtime = common::runtime();
    runtime
        .registry
        .add(
            RuleSpec::new("r1", "events.user.*")
                .with_filter_expr("payload.region == 'eu' AND payload.amount > 100")
                .with_target("echo", ""),
        )
        .unwrap();

    let hit = common::event("events.user.created", json!({"region": "eu", "amount": 150}));
    let targets = runtime.dispatcher.route(&hit);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].route_id, "r1");
    assert_eq!(targets[0].kind, "echo");

    let low = common::event("events.user.created", json!({"region": "eu", "amount": 50}));
    assert!(runtime.dispatcher.route(&low).is_empty());

    let other = common::event("events.order.created", json!({"region": "eu", "amount": 150}));
    assert!(runtime.dispatcher.route(&other).is_empty());
}

#[test]
fn test_subject_mismatch_skips_filter() {
    let (functions, calls) = common::counting_functions();
    let runtime = common::runtime_with(functions);
    runtime
        .registry
        .add(common::echo_rule("r1", "events.user.*").with_filter_expr("tally(payload.x)"))
        .unwrap();

    let miss = common::event("events.order.created", json!({"x": 1}));
    assert!(runtime.dispatcher.route(&miss).is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let hit = common::event("events.user.created", json!({"x": 1}));
    assert_eq!(runtime.dispatcher.route(&hit).len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fan_out_in_rule_order() {
    let runtime = common::runtime();
    for (id, pattern) in [("c", "orders.>"), ("a", "orders.*.created"), ("b", "*.eu.*")] {
        runtime.registry.add(common::echo_rule(id, pattern)).unwrap();
    }
    runtime.registry.add(common::echo_rule("skip", "billing.>")).unwrap();

    let event = common::event("orders.eu.created", json!({}));
    let ids: Vec<_> = runtime
        .dispatcher
        .route(&event)
        .into_iter()
        .map(|t| t.route_id)
        .collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[test]
fn test_rule_with_several_targets() {
    let runtime = common::runtime();
    let spec = RuleSpec::new("multi", "audit.>")
        .with_target("echo", "first/{{payload.user}}")
        .with_target("echo", "second/{{route_id}}");
    runtime.registry.add(spec).unwrap();

    let event = common::event("audit.login", json!({"user": "ada"}));
    let destinations: Vec<_> = runtime
        .dispatcher
        .route(&event)
        .into_iter()
        .map(|t| t.destination)
        .collect();
    assert_eq!(destinations, vec!["first/ada", "second/multi"]);
}

#[test]
fn test_simple_filter_agrees_with_expression() {
    let runtime = common::runtime();
    runtime
        .registry
        .add(
            common::echo_rule("simple", "events.>")
                .with_filter_eq("payload.type", json!("login"))
                .with_filter_eq("payload.attempts", json!(3)),
        )
        .unwrap();
    runtime
        .registry
        .add(
            common::echo_rule("expr", "events.>")
                .with_filter_expr("payload.type == 'login' AND payload.attempts == 3"),
        )
        .unwrap();

    let corpus = [
        json!({"type": "login", "attempts": 3}),
        json!({"type": "login", "attempts": 3.0}),
        json!({"type": "login", "attempts": "3"}),
        json!({"type": "logout", "attempts": 3}),
        json!({"type": "login"}),
        json!({"type": null, "attempts": 3}),
        json!({}),
        json!("not an object"),
        json!(null),
    ];
    for payload in corpus {
        let event = common::event("events.auth", payload.clone());
        let ids: Vec<_> = runtime
            .dispatcher
            .route(&event)
            .into_iter()
            .map(|t| t.route_id)
            .collect();
        let simple = ids.iter().any(|id| id == "simple");
        let expr = ids.iter().any(|id| id == "expr");
        assert_eq!(simple, expr, "filters disagree on {payload}");
    }
}

#[test]
fn test_and_short_circuits_host_function() {
    let (functions, calls) = common::counting_functions();
    let runtime = common::runtime_with(functions);
    runtime
        .registry
        .add(common::echo_rule("r1", "events.>").with_filter_expr("payload.flag == true AND tally(payload.x)"))
        .unwrap();

    let event = common::event("events.a", json!({"flag": false, "x": 1}));
    assert!(runtime.dispatcher.route(&event).is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_or_short_circuits_host_function() {
    let (functions, calls) = common::counting_functions();
    let runtime = common::runtime_with(functions);
    runtime
        .registry
        .add(common::echo_rule("r1", "events.>").with_filter_expr("tally(payload.x) == true OR payload.amount > 100"))
        .unwrap();

    let event = common::event("events.a", json!({"x": 1, "amount": 500}));
    assert_eq!(runtime.dispatcher.route(&event).len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let event = common::event("events.a", json!({"x": 1, "amount": 5}));
    assert_eq!(runtime.dispatcher.route(&event).len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_negated_error_is_non_match() {
    let runtime = common::runtime();
    runtime
        .registry
        .add(common::echo_rule("neg", "events.>").with_filter_expr("NOT (payload.name > 5 AND payload.ok)"))
        .unwrap();

    let event = common::event("events.a", json!({"name": "x", "ok": true}));
    assert!(runtime.dispatcher.route(&event).is_empty());
    assert_eq!(runtime.counters.snapshot().eval_errors, 1);
}

#[test]
fn test_malformed_rule_does_not_affect_others() {
    let runtime = common::runtime();
    runtime
        .registry
        .add(common::echo_rule("typed", "events.>").with_filter_expr("payload.name > 3"))
        .unwrap();
    runtime.registry.add(common::echo_rule("plain", "events.>")).unwrap();

    let event = common::event("events.a", json!({"name": "ada"}));
    let ids: Vec<_> = runtime.dispatcher.route(&event).into_iter().map(|t| t.route_id).collect();
    assert_eq!(ids, vec!["plain"]);
    assert_eq!(runtime.counters.snapshot().eval_errors, 1);
}

#[test]
fn test_rejected_rule_has_no_effect() {
    let runtime = common::runtime();
    let before = runtime.registry.revision();
    let err = runtime
        .registry
        .add(common::echo_rule("bad", "events.>").with_filter_expr("payload.a =="))
        .unwrap_err();
    assert_eq!(err.kind(), "syntax_error");
    assert!(runtime.registry.get("bad").is_none());
    assert_eq!(runtime.registry.revision(), before);
    assert_eq!(runtime.counters.snapshot().compile_failures, 1);
}

#[test]
fn test_commands_drive_registry() {
    let runtime = common::runtime();
    let command: RuleCommand = serde_json::from_value(json!({
        "op": "add",
        "route_id": "cmd",
        "subject": "jobs.*",
        "filter_expr": "payload.priority >= 5",
        "targets": [{"kind": "echo", "destination": "urgent"}]
    }))
    .unwrap();
    runtime.registry.apply(command).unwrap();

    let urgent = common::event("jobs.build", json!({"priority": 7}));
    assert_eq!(runtime.dispatcher.route(&urgent).len(), 1);

    runtime
        .registry
        .apply(RuleCommand::Remove { route_id: "cmd".into() })
        .unwrap();
    assert!(runtime.dispatcher.route(&urgent).is_empty());
}

#[test]
fn test_service_delivers_to_forwarders() {
    let recorder = Arc::new(common::RecordingForwarder::default());
    let mut forwarders = ForwarderRegistry::new();
    forwarders.register(recorder.clone());

    let runtime = common::runtime();
    runtime
        .registry
        .add(RuleSpec::new("rec", "events.>").with_target("record", "sink/{{headers.tenant}}"))
        .unwrap();
    runtime
        .registry
        .add(RuleSpec::new("lost", "events.>").with_target("carrier-pigeon", "nowhere"))
        .unwrap();

    let service = RouterService::new(runtime.dispatcher.clone(), forwarders);
    let event = Event::new("events.a", HashMap::from([("tenant".to_string(), "acme".to_string())]), "{}");
    let report = service.handle(&event);

    assert_eq!(report.delivered.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert!(!report.is_complete());
    assert_eq!(recorder.delivered()[0].destination, "sink/acme");
}

#[test]
fn test_dispatch_is_deterministic() {
    let runtime = common::runtime();
    for i in 0..20 {
        runtime
            .registry
            .add(common::echo_rule(&format!("r{i}"), if i % 2 == 0 { "a.>" } else { "a.*" }))
            .unwrap();
    }
    let dispatcher = Dispatcher::new(runtime.registry.clone(), ExecutionBudget::default());
    let event = common::event("a.b", json!({}));
    let first = dispatcher.route(&event);
    for _ in 0..10 {
        assert_eq!(dispatcher.route(&event), first);
    }
    assert_eq!(first.len(), 20);
}

#[test]
fn test_host_functions_in_filters() {
    let mut functions = FunctionRegistry::new();
    functions
        .register("is_vip", 1, |args| {
            Ok(matches!(args[0].as_str(), Some(id) if id.starts_with("vip-")).into())
        })
        .unwrap();
    let runtime = common::runtime_with(functions);
    runtime
        .registry
        .add(common::echo_rule("vip", "users.>").with_filter_expr("is_vip(payload.id)"))
        .unwrap();

    assert_eq!(runtime.dispatcher.route(&common::event("users.seen", json!({"id": "vip-1"}))).len(), 1);
    assert!(runtime.dispatcher.route(&common::event("users.seen", json!({"id": "u-1"}))).is_empty());
}
