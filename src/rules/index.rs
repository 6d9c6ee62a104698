//! Immutable, ordered rule set with a first-token index.
//!
//! # Design Decisions
//! - Rules are kept in registry order; every lookup yields candidates in
//!   that order
//! - Rules whose pattern starts with a literal are bucketed by it; patterns
//!   starting with `*` or `>` sit in a separate list checked for every
//!   subject
//! - Candidate lookup merges both position lists, so no sort per event

use std::collections::HashMap;
use std::sync::Arc;

use crate::routing::subject::first_token;
use crate::rules::rule::RoutingRule;

#[derive(Debug, Default)]
pub struct RuleIndex {
    rules: Vec<Arc<RoutingRule>>,
    positions: HashMap<String, usize>,
    by_first_token: HashMap<String, Vec<usize>>,
    wildcard_first: Vec<usize>,
    revision: u64,
}

impl RuleIndex {
    pub fn build(rules: Vec<Arc<RoutingRule>>, revision: u64) -> Self {
        let mut positions = HashMap::with_capacity(rules.len());
        let mut by_first_token: HashMap<String, Vec<usize>> = HashMap::new();
        let mut wildcard_first = Vec::new();

        for (pos, rule) in rules.iter().enumerate() {
            positions.insert(rule.route_id().to_string(), pos);
            match rule.pattern().first_literal() {
                Some(token) => by_first_token.entry(token.to_string()).or_default().push(pos),
                None => wildcard_first.push(pos),
            }
        }

        Self {
            rules,
            positions,
            by_first_token,
            wildcard_first,
            revision,
        }
    }

    /// Registry revision this snapshot was published at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Arc<RoutingRule>] {
        &self.rules
    }

    pub fn position(&self, route_id: &str) -> Option<usize> {
        self.positions.get(route_id).copied()
    }

    pub fn get(&self, route_id: &str) -> Option<&Arc<RoutingRule>> {
        self.position(route_id).map(|pos| &self.rules[pos])
    }

    /// Rules that may match `subject`, in rule order. Callers still run the
    /// full pattern match on each candidate.
    pub fn candidates<'a>(&'a self, subject: &str) -> Candidates<'a> {
        let literal = self
            .by_first_token
            .get(first_token(subject))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Candidates {
            rules: &self.rules,
            literal,
            wildcard: &self.wildcard_first,
        }
    }
}

/// Ordered merge of the literal bucket and the wildcard-first list.
pub struct Candidates<'a> {
    rules: &'a [Arc<RoutingRule>],
    literal: &'a [usize],
    wildcard: &'a [usize],
}

impl<'a> Iterator for Candidates<'a> {
    type Item = &'a Arc<RoutingRule>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = match (self.literal.first(), self.wildcard.first()) {
            (Some(&a), Some(&b)) if a < b => {
                self.literal = &self.literal[1..];
                a
            }
            (_, Some(&b)) => {
                self.wildcard = &self.wildcard[1..];
                b
            }
            (Some(&a), None) => {
                self.literal = &self.literal[1..];
                a
            }
            (None, None) => return None,
        };
        self.rules.get(pos)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.literal.len() + self.wildcard.len();
        (n, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile::Compiler;
    use crate::rules::rule::{RuleSource, RuleSpec};
    use chrono::Utc;

    fn rule(id: &str, subject: &str) -> Arc<RoutingRule> {
        let spec = RuleSpec::new(id, subject).with_target("echo", "x");
        Arc::new(RoutingRule::compile(spec, &Compiler::new(), RuleSource::Api, Utc::now()).unwrap())
    }

    #[test]
    fn test_candidates_preserve_order() {
        let index = RuleIndex::build(
            vec![
                rule("a", "orders.created"),
                rule("b", "*.created"),
                rule("c", "users.>"),
                rule("d", "orders.*"),
                rule("e", ">"),
            ],
            7,
        );
        let ids: Vec<_> = index.candidates("orders.created").map(|r| r.route_id()).collect();
        assert_eq!(ids, vec!["a", "b", "d", "e"]);

        let ids: Vec<_> = index.candidates("payments.x").map(|r| r.route_id()).collect();
        assert_eq!(ids, vec!["b", "e"]);
        assert_eq!(index.revision(), 7);
    }

    #[test]
    fn test_lookup() {
        let index = RuleIndex::build(vec![rule("a", "x"), rule("b", "y")], 1);
        assert_eq!(index.position("b"), Some(1));
        assert_eq!(index.get("a").map(|r| r.route_id()), Some("a"));
        assert!(index.get("z").is_none());
        assert_eq!(index.len(), 2);
    }
}
