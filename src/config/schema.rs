//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.
//!
//! ```toml
//! [admin]
//! enabled = true
//! bind_address = "127.0.0.1:8081"
//! api_key = "..."
//!
//! [evaluation]
//! max_node_visits = 10000
//! max_eval_millis = 50
//!
//! [[rules]]
//! route_id = "logins"
//! subject = "events.user.*"
//! filter_expr = "payload.type == 'login'"
//! targets = [{ kind = "echo", destination = "audit/{{payload.user_id}}" }]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expr::eval::ExecutionBudget;
use crate::rules::rule::RuleSpec;

/// Root configuration for the event router.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Admin control API.
    pub admin: AdminConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Registry maintenance.
    pub registry: RegistryConfig,

    /// Filter evaluation limits.
    pub evaluation: EvaluationConfig,

    /// File-managed rules, reconciled on every (re)load.
    pub rules: Vec<RuleSpec>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Rule registry maintenance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often expired rules are swept.
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
        }
    }
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Limits applied while routing one event.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Node visits allowed per filter evaluation.
    pub max_node_visits: u64,

    /// Wall-clock limit per filter evaluation (0 = none).
    pub max_eval_millis: u64,

    /// Deadline for the whole routing decision of one event (0 = none).
    pub route_timeout_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_node_visits: 10_000,
            max_eval_millis: 50,
            route_timeout_ms: 0,
        }
    }
}

impl EvaluationConfig {
    pub fn budget(&self) -> ExecutionBudget {
        let budget = ExecutionBudget::new(self.max_node_visits);
        match self.max_eval_millis {
            0 => budget,
            ms => budget.with_max_duration(Duration::from_millis(ms)),
        }
    }

    pub fn route_timeout(&self) -> Option<Duration> {
        match self.route_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: RouterConfig = toml::from_str("").unwrap();
        assert_eq!(config, RouterConfig::default());
        assert_eq!(config.evaluation.budget(), ExecutionBudget::default());
        assert_eq!(config.evaluation.route_timeout(), None);
    }

    #[test]
    fn test_rules_section() {
        let config: RouterConfig = toml::from_str(
            r#"
            [evaluation]
            max_node_visits = 500
            max_eval_millis = 0

            [[rules]]
            route_id = "r1"
            subject = "events.user.*"
            filter_expr = "payload.type == 'login'"
            targets = [{ kind = "echo", destination = "audit/{{payload.user_id}}" }]

            [[rules]]
            route_id = "r2"
            subject = "orders.>"
            filter = { "payload.region" = "eu" }
            targets = [{ kind = "echo", destination = "eu", fields = { key = "{{payload.id}}" } }]
            "#,
        )
        .unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[1].filter.get("payload.region"), Some(&serde_json::json!("eu")));
        assert_eq!(config.rules[1].targets[0].fields.get("key").map(String::as_str), Some("{{payload.id}}"));
        assert_eq!(config.evaluation.budget(), ExecutionBudget::new(500));
    }
}
