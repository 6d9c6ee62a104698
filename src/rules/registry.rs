//! Live, concurrently mutable rule registry.
//!
//! # Responsibilities
//! - Validate and compile rule definitions before publication
//! - Publish point-in-time snapshots to routing workers
//! - Assign monotonic revisions to every published change
//!
//! # Design Decisions
//! - Copy-on-write: each mutation builds a new [`RuleIndex`] and swaps it in
//!   atomically; readers load the current `Arc` and never block
//! - Writers are serialized by a mutex; compilation happens before the lock
//!   is taken so a slow regex never stalls other writers
//! - Insertion order is rule order; replacing a rule keeps its position
//! - A rule past its `expires_at` is treated as absent by `add`/`update`
//!   and physically removed by [`RuleRegistry::sweep_expired`]

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::expr::compile::Compiler;
use crate::observability::metrics::{self, RouterCounters};
use crate::rules::command::{CommandOutcome, RuleCommand};
use crate::rules::error::RegistryError;
use crate::rules::index::RuleIndex;
use crate::rules::rule::{RoutingRule, RuleSource, RuleSpec};

/// A consistent point-in-time view of the registry.
pub type RuleSnapshot = Arc<RuleIndex>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Add,
    Upsert,
    Update,
}

/// Result of publishing one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Published {
    pub revision: u64,
    pub replaced: bool,
}

pub struct RuleRegistry {
    current: ArcSwap<RuleIndex>,
    writer: Mutex<()>,
    compiler: Compiler,
    counters: Arc<RouterCounters>,
}

impl RuleRegistry {
    pub fn new(compiler: Compiler, counters: Arc<RouterCounters>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleIndex::default()),
            writer: Mutex::new(()),
            compiler,
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<RouterCounters> {
        &self.counters
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Validate and compile a definition without publishing it.
    pub fn compile(&self, spec: RuleSpec, source: RuleSource) -> Result<RoutingRule, RegistryError> {
        let route_id = spec.route_id.clone();
        RoutingRule::compile(spec, &self.compiler, source, Utc::now()).map_err(|e| {
            self.counters.compile_failure(e.kind());
            tracing::warn!(route_id = %route_id, error = %e, "Rule rejected");
            e
        })
    }

    /// Insert a new rule. Fails with `DuplicateRoute` if a live rule with
    /// the same id exists.
    pub fn add(&self, spec: RuleSpec) -> Result<u64, RegistryError> {
        self.publish(spec, RuleSource::Api, WriteMode::Add)
            .map(|p| p.revision)
    }

    /// Insert a rule, replacing any existing rule with the same id in place.
    pub fn add_or_replace(&self, spec: RuleSpec) -> Result<u64, RegistryError> {
        self.publish(spec, RuleSource::Api, WriteMode::Upsert)
            .map(|p| p.revision)
    }

    /// Replace an existing live rule. Fails with `RouteNotFound` otherwise.
    pub fn update(&self, spec: RuleSpec) -> Result<u64, RegistryError> {
        self.publish(spec, RuleSource::Api, WriteMode::Update)
            .map(|p| p.revision)
    }

    /// Remove a rule by id. Returns whether a rule was removed.
    pub fn remove(&self, route_id: &str) -> bool {
        let removed = self.commit(|rules, _| {
            let before = rules.len();
            rules.retain(|r| r.route_id() != route_id);
            let removed = before != rules.len();
            if removed {
                self.counters.forget_route(route_id);
            }
            removed
        });
        if removed {
            tracing::info!(route_id = %route_id, "Rule removed");
        }
        removed
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        self.current.load_full()
    }

    pub fn get(&self, route_id: &str) -> Option<Arc<RoutingRule>> {
        self.current.load().get(route_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revision of the most recently published snapshot.
    pub fn revision(&self) -> u64 {
        self.current.load().revision()
    }

    /// Execute a control command.
    pub fn apply(&self, command: RuleCommand) -> Result<CommandOutcome, RegistryError> {
        match command {
            RuleCommand::Add { rule, replace } => {
                let route_id = rule.route_id.clone();
                let mode = if replace { WriteMode::Upsert } else { WriteMode::Add };
                let published = self.publish(rule, RuleSource::Api, mode)?;
                Ok(if published.replaced {
                    CommandOutcome::Replaced {
                        route_id,
                        revision: published.revision,
                    }
                } else {
                    CommandOutcome::Added {
                        route_id,
                        revision: published.revision,
                    }
                })
            }
            RuleCommand::Update { rule } => {
                let route_id = rule.route_id.clone();
                let revision = self.update(rule)?;
                Ok(CommandOutcome::Updated { route_id, revision })
            }
            RuleCommand::Remove { route_id } => {
                if self.remove(&route_id) {
                    Ok(CommandOutcome::Removed { route_id })
                } else {
                    Err(RegistryError::RouteNotFound(route_id))
                }
            }
        }
    }

    /// Definitions of all live rules, in rule order, for a storage
    /// collaborator to persist. Re-adding them restores the registry.
    pub fn export(&self) -> Vec<RuleSpec> {
        let now = Utc::now();
        self.snapshot()
            .rules()
            .iter()
            .filter(|r| !r.is_expired(now))
            .map(|r| r.to_spec())
            .collect()
    }

    /// Drop every rule whose expiry is at or before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        self.commit(|rules, _| {
            rules.retain(|r| {
                let keep = !r.is_expired(now);
                if !keep {
                    expired.push(r.route_id().to_string());
                }
                keep
            });
            for route_id in &expired {
                self.counters.forget_route(route_id);
            }
            !expired.is_empty()
        });
        for route_id in &expired {
            tracing::info!(route_id = %route_id, "Expired rule swept");
        }
        expired.len()
    }

    pub(crate) fn publish(
        &self,
        spec: RuleSpec,
        source: RuleSource,
        mode: WriteMode,
    ) -> Result<Published, RegistryError> {
        let route_id = spec.route_id.clone();
        let rule = self.compile(spec, source)?;
        let now = Utc::now();

        let published = self.try_commit(|rules, revision| {
            let existing = rules.iter().position(|r| r.route_id() == route_id);
            let live = existing.filter(|&pos| !rules[pos].is_expired(now));

            match (mode, live) {
                (WriteMode::Add, Some(_)) => {
                    return Err(RegistryError::DuplicateRoute(route_id.clone()))
                }
                (WriteMode::Update, None) => {
                    return Err(RegistryError::RouteNotFound(route_id.clone()))
                }
                _ => {}
            }

            let rule = Arc::new(rule.with_revision(revision));
            self.counters.track_route(&route_id);
            match (existing, live) {
                (Some(pos), Some(_)) => rules[pos] = rule,
                (Some(pos), None) => {
                    rules.remove(pos);
                    rules.push(rule);
                }
                (None, _) => rules.push(rule),
            }
            Ok(Published {
                revision,
                replaced: live.is_some(),
            })
        })?;

        tracing::info!(
            route_id = %route_id,
            revision = published.revision,
            replaced = published.replaced,
            "Rule published"
        );
        Ok(published)
    }

    /// Run `f` on a copy of the rule list under the writer lock and publish
    /// the result if `f` reports a change.
    pub(crate) fn commit<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<Arc<RoutingRule>>, u64) -> bool,
    {
        self.try_commit(|rules, revision| Ok::<_, RegistryError>(f(rules, revision)))
            .unwrap_or(false)
    }

    /// Like [`commit`](Self::commit) but the closure may reject the change.
    /// Nothing is published when it fails or reports no change.
    pub(crate) fn try_commit<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut Vec<Arc<RoutingRule>>, u64) -> Result<T, RegistryError>,
        T: Changed,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load_full();
        let revision = current.revision() + 1;
        let mut rules = current.rules().to_vec();

        let outcome = f(&mut rules, revision)?;
        if outcome.changed() {
            let live = rules.len();
            self.current.store(Arc::new(RuleIndex::build(rules, revision)));
            metrics::record_rules_live(live);
        }
        Ok(outcome)
    }
}

/// Whether a write closure altered the rule list.
pub(crate) trait Changed {
    fn changed(&self) -> bool;
}

impl Changed for bool {
    fn changed(&self) -> bool {
        *self
    }
}

impl Changed for Published {
    fn changed(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}
