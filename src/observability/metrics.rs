//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define router metrics (match attempts, matches, evaluation failures)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-route and aggregate counters in process
//!
//! # Metrics
//! - `router_match_attempts_total` (counter): filter evaluations by route
//! - `router_rules_matched_total` (counter): successful matches by route
//! - `router_budget_exceeded_total` (counter): evaluations aborted by budget
//! - `router_eval_errors_total` (counter): evaluations that errored
//! - `router_compile_failures_total` (counter): rejected rule definitions
//! - `router_rules_live` (gauge): rules in the current snapshot
//! - `router_route_duration_seconds` (histogram): per-event routing latency
//!
//! # Design Decisions
//! - Facade calls are no-ops until an exporter is installed
//! - `RouterCounters` mirrors the aggregates with atomics so tests and the
//!   admin API can read them without a scrape

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// Install the Prometheus exporter and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_match_attempt(route_id: &str) {
    ::metrics::counter!("router_match_attempts_total", "route" => route_id.to_string()).increment(1);
}

pub fn record_rule_matched(route_id: &str) {
    ::metrics::counter!("router_rules_matched_total", "route" => route_id.to_string()).increment(1);
}

pub fn record_budget_exceeded(route_id: &str) {
    ::metrics::counter!("router_budget_exceeded_total", "route" => route_id.to_string()).increment(1);
}

pub fn record_eval_error(route_id: &str) {
    ::metrics::counter!("router_eval_errors_total", "route" => route_id.to_string()).increment(1);
}

pub fn record_compile_failure(reason: &'static str) {
    ::metrics::counter!("router_compile_failures_total", "reason" => reason).increment(1);
}

pub fn record_rules_live(count: usize) {
    ::metrics::gauge!("router_rules_live").set(count as f64);
}

pub fn record_route_duration(start: Instant) {
    ::metrics::histogram!("router_route_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Per-route hit statistics.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RouteStats {
    pub attempts: u64,
    pub matches: u64,
    pub errors: u64,
    pub last_matched: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the aggregate counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub events_routed: u64,
    pub match_attempts: u64,
    pub rules_matched: u64,
    pub budget_exceeded: u64,
    pub eval_errors: u64,
    pub compile_failures: u64,
    pub cancelled: u64,
}

/// Process-wide routing counters shared by the registry and dispatcher.
#[derive(Debug, Default)]
pub struct RouterCounters {
    events_routed: AtomicU64,
    match_attempts: AtomicU64,
    rules_matched: AtomicU64,
    budget_exceeded: AtomicU64,
    eval_errors: AtomicU64,
    compile_failures: AtomicU64,
    cancelled: AtomicU64,
    routes: DashMap<String, RouteStats>,
}

impl RouterCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start per-route statistics for a rule entering the registry. Only
    /// tracked routes collect stats, so a decision running on an older
    /// snapshot cannot revive a forgotten route.
    pub fn track_route(&self, route_id: &str) {
        self.routes.entry(route_id.to_string()).or_default();
    }

    pub fn match_attempt(&self, route_id: &str) {
        self.match_attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(mut stats) = self.routes.get_mut(route_id) {
            stats.attempts += 1;
        }
        record_match_attempt(route_id);
    }

    pub fn rule_matched(&self, route_id: &str) {
        self.rules_matched.fetch_add(1, Ordering::Relaxed);
        if let Some(mut stats) = self.routes.get_mut(route_id) {
            stats.matches += 1;
            stats.last_matched = Some(Utc::now());
        }
        record_rule_matched(route_id);
    }

    pub fn budget_exceeded(&self, route_id: &str) {
        self.budget_exceeded.fetch_add(1, Ordering::Relaxed);
        self.route_error(route_id);
        record_budget_exceeded(route_id);
    }

    pub fn eval_error(&self, route_id: &str) {
        self.eval_errors.fetch_add(1, Ordering::Relaxed);
        self.route_error(route_id);
        record_eval_error(route_id);
    }

    fn route_error(&self, route_id: &str) {
        if let Some(mut stats) = self.routes.get_mut(route_id) {
            stats.errors += 1;
        }
    }

    pub fn compile_failure(&self, reason: &'static str) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
        record_compile_failure(reason);
    }

    pub fn event_routed(&self, start: Instant) -> Duration {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
        record_route_duration(start);
        start.elapsed()
    }

    pub fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop statistics for a route that left the registry.
    pub fn forget_route(&self, route_id: &str) {
        self.routes.remove(route_id);
    }

    pub fn route_stats(&self, route_id: &str) -> Option<RouteStats> {
        self.routes.get(route_id).map(|r| r.value().clone())
    }

    pub fn all_route_stats(&self) -> Vec<(String, RouteStats)> {
        let mut stats: Vec<_> = self
            .routes
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            events_routed: self.events_routed.load(Ordering::Relaxed),
            match_attempts: self.match_attempts.load(Ordering::Relaxed),
            rules_matched: self.rules_matched.load(Ordering::Relaxed),
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            eval_errors: self.eval_errors.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
