//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, addresses parse)
//! - Detect duplicate rule ids and malformed subject patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Filter expressions are compiled by the registry, which knows the host
//!   functions; only subject patterns are checked here

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::schema::RouterConfig;
use crate::routing::subject::SubjectPattern;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    let obs = &config.observability;
    if EnvFilter::try_new(&obs.log_level).is_err() {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not a valid filter directive", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if config.registry.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("registry.sweep_interval_secs", "must be > 0"));
    }
    if config.evaluation.max_node_visits == 0 {
        errors.push(ValidationError::new("evaluation.max_node_visits", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for (i, rule) in config.rules.iter().enumerate() {
        let field = |name: &str| format!("rules[{}].{}", i, name);
        if rule.route_id.is_empty() {
            errors.push(ValidationError::new(field("route_id"), "must not be empty"));
        } else if !seen.insert(rule.route_id.as_str()) {
            errors.push(ValidationError::new(
                field("route_id"),
                format!("duplicate route_id '{}'", rule.route_id),
            ));
        }
        if let Err(e) = SubjectPattern::compile(&rule.subject) {
            errors.push(ValidationError::new(field("subject"), e.reason));
        }
        if rule.targets.is_empty() {
            errors.push(ValidationError::new(field("targets"), "at least one target required"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::RuleSpec;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RouterConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = RouterConfig::default();
        config.admin.enabled = true;
        config.admin.bind_address = "nowhere".into();
        config.admin.api_key = " ".into();
        config.registry.sweep_interval_secs = 0;
        config.rules = vec![
            RuleSpec::new("a", "x.y").with_target("echo", "o"),
            RuleSpec::new("a", "x..y").with_target("echo", "o"),
            RuleSpec::new("b", "x"),
        ];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "admin.bind_address",
                "admin.api_key",
                "registry.sweep_interval_secs",
                "rules[1].route_id",
                "rules[1].subject",
                "rules[2].targets",
            ]
        );
    }
}
