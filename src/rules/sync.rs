//! Reconciliation of file-managed rules against the `[[rules]]` section of
//! the configuration.
//!
//! # Design Decisions
//! - Only rules whose source is [`RuleSource::File`] are added, replaced or
//!   removed; API-managed rules with a clashing id win and are reported
//! - A definition that fails to compile leaves the previous version live
//! - All changes land in a single published snapshot

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::rules::registry::RuleRegistry;
use crate::rules::rule::{RoutingRule, RuleSource, RuleSpec};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    /// `(route_id, reason)` for definitions that did not compile.
    pub rejected: Vec<(String, String)>,
    /// Ids already owned by an API-managed rule.
    pub conflicts: Vec<String>,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

pub fn reconcile_file_rules(registry: &RuleRegistry, specs: &[RuleSpec]) -> SyncReport {
    let mut report = SyncReport::default();
    let mut declared = HashSet::new();
    let mut compiled: Vec<(RuleSpec, RoutingRule)> = Vec::with_capacity(specs.len());

    for spec in specs {
        if !declared.insert(spec.route_id.clone()) {
            report
                .rejected
                .push((spec.route_id.clone(), "route_id declared twice".to_string()));
            continue;
        }
        match registry.compile(spec.clone(), RuleSource::File) {
            Ok(rule) => compiled.push((spec.clone(), rule)),
            Err(e) => report.rejected.push((spec.route_id.clone(), e.to_string())),
        }
    }

    registry.commit(|rules, revision| {
        rules.retain(|r| {
            let stale = r.source() == RuleSource::File && !declared.contains(r.route_id());
            if stale {
                registry.counters().forget_route(r.route_id());
                report.removed.push(r.route_id().to_string());
            }
            !stale
        });

        for (spec, rule) in compiled {
            let route_id = spec.route_id.clone();
            match rules.iter().position(|r| r.route_id() == route_id) {
                Some(pos) if rules[pos].source() == RuleSource::Api => {
                    report.conflicts.push(route_id);
                }
                Some(pos) if rules[pos].same_definition(&spec) => {
                    report.unchanged += 1;
                }
                Some(pos) => {
                    registry.counters().track_route(&route_id);
                    rules[pos] = Arc::new(rule.with_revision(revision));
                    report.updated.push(route_id);
                }
                None => {
                    registry.counters().track_route(&route_id);
                    rules.push(Arc::new(rule.with_revision(revision)));
                    report.added.push(route_id);
                }
            }
        }

        report.has_changes()
    });

    for route_id in &report.conflicts {
        tracing::warn!(route_id = %route_id, "Config rule ignored: id is managed through the admin API");
    }
    tracing::info!(
        added = report.added.len(),
        updated = report.updated.len(),
        removed = report.removed.len(),
        unchanged = report.unchanged,
        rejected = report.rejected.len(),
        "File-managed rules reconciled"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile::Compiler;
    use crate::observability::metrics::RouterCounters;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(Compiler::new(), Arc::new(RouterCounters::new()))
    }

    fn spec(id: &str, subject: &str) -> RuleSpec {
        RuleSpec::new(id, subject).with_target("echo", "out")
    }

    #[test]
    fn test_reconcile_add_update_remove() {
        let registry = registry();
        let report = reconcile_file_rules(&registry, &[spec("a", "x.y"), spec("b", "x.z")]);
        assert_eq!(report.added, vec!["a", "b"]);
        let rev = registry.revision();

        let report = reconcile_file_rules(&registry, &[spec("a", "x.y"), spec("b", "x.z")]);
        assert!(!report.has_changes());
        assert_eq!(report.unchanged, 2);
        assert_eq!(registry.revision(), rev);

        let report = reconcile_file_rules(&registry, &[spec("b", "x.*")]);
        assert_eq!(report.removed, vec!["a"]);
        assert_eq!(report.updated, vec!["b"]);
        assert_eq!(registry.get("b").unwrap().pattern().as_str(), "x.*");
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_api_rules_untouched() {
        let registry = registry();
        registry.add(spec("api", "q")).unwrap();
        let report = reconcile_file_rules(&registry, &[spec("api", "other"), spec("f", "q")]);
        assert_eq!(report.conflicts, vec!["api"]);
        assert_eq!(registry.get("api").unwrap().pattern().as_str(), "q");

        let report = reconcile_file_rules(&registry, &[]);
        assert_eq!(report.removed, vec!["f"]);
        assert!(registry.get("api").is_some());
    }

    #[test]
    fn test_rejected_definition_keeps_previous() {
        let registry = registry();
        reconcile_file_rules(&registry, &[spec("a", "x")]);
        let report = reconcile_file_rules(&registry, &[spec("a", "x.>.y")]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(registry.get("a").unwrap().pattern().as_str(), "x");
        assert_eq!(registry.counters().snapshot().compile_failures, 1);
    }
}
