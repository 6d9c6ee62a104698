//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize core components in dependency order
//! - Load file-managed rules into the registry
//! - Apply reloaded configuration
//!
//! # Design Decisions
//! - Fail fast: configuration errors surface before any task starts
//! - Evaluation limits are fixed for the process lifetime; a reload only
//!   reconciles rules

use std::sync::Arc;

use crate::config::schema::RouterConfig;
use crate::expr::compile::Compiler;
use crate::expr::functions::FunctionRegistry;
use crate::forward::{ForwarderRegistry, RouterService};
use crate::observability::metrics::RouterCounters;
use crate::routing::dispatcher::Dispatcher;
use crate::rules::registry::RuleRegistry;
use crate::rules::sync::{reconcile_file_rules, SyncReport};

/// The wired-up routing core.
#[derive(Debug, Clone)]
pub struct RouterRuntime {
    pub counters: Arc<RouterCounters>,
    pub registry: Arc<RuleRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub service: Arc<RouterService>,
}

impl RouterRuntime {
    /// Build the core from configuration, host functions and forwarders,
    /// then load the `[[rules]]` section.
    pub fn build(
        config: &RouterConfig,
        functions: FunctionRegistry,
        forwarders: ForwarderRegistry,
    ) -> Self {
        let counters = Arc::new(RouterCounters::new());
        let registry = Arc::new(RuleRegistry::new(
            Compiler::with_functions(functions),
            counters.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), config.evaluation.budget()));

        let mut service = RouterService::new(dispatcher.clone(), forwarders);
        if let Some(timeout) = config.evaluation.route_timeout() {
            service = service.with_route_timeout(timeout);
        }

        let runtime = Self {
            counters,
            registry,
            dispatcher,
            service: Arc::new(service),
        };
        runtime.load_rules(config);

        tracing::info!(
            rules = runtime.registry.len(),
            max_node_visits = config.evaluation.max_node_visits,
            max_eval_millis = config.evaluation.max_eval_millis,
            "Router core initialized"
        );
        runtime
    }

    /// Reconcile file-managed rules with `config`.
    pub fn load_rules(&self, config: &RouterConfig) -> SyncReport {
        let report = reconcile_file_rules(&self.registry, &config.rules);
        for (route_id, reason) in &report.rejected {
            tracing::error!(route_id = %route_id, reason = %reason, "Config rule rejected");
        }
        report
    }

    /// Apply a reloaded configuration.
    pub fn reload(&self, previous: &RouterConfig, next: &RouterConfig) -> SyncReport {
        if previous.evaluation != next.evaluation || previous.admin != next.admin {
            tracing::warn!("Evaluation and admin settings take effect after restart");
        }
        self.load_rules(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;

    const CONFIG: &str = r#"
        [[rules]]
        route_id = "r1"
        subject = "events.user.*"
        filter_expr = "payload.type == 'login'"
        targets = [{ kind = "echo", destination = "audit/{{payload.user_id}}" }]
    "#;

    #[test]
    fn test_build_loads_rules() {
        let config = parse_config(CONFIG).unwrap();
        let runtime = RouterRuntime::build(&config, FunctionRegistry::new(), ForwarderRegistry::with_echo());
        assert_eq!(runtime.registry.len(), 1);
        assert_eq!(
            runtime.registry.get("r1").map(|r| r.source()),
            Some(crate::rules::rule::RuleSource::File)
        );
    }

    #[test]
    fn test_reload_reconciles() {
        let config = parse_config(CONFIG).unwrap();
        let runtime = RouterRuntime::build(&config, FunctionRegistry::new(), ForwarderRegistry::with_echo());
        let report = runtime.reload(&config, &RouterConfig::default());
        assert_eq!(report.removed, vec!["r1"]);
        assert!(runtime.registry.is_empty());
    }
}
