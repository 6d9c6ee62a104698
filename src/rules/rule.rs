//! Rule definitions and their compiled form.
//!
//! A [`RuleSpec`] is the serializable definition accepted from the admin
//! API, the config file and storage collaborators. [`RoutingRule`] is the
//! validated, compiled, immutable value the registry publishes.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::expr::compile::{CompiledExpression, Compiler, FieldRef};
use crate::expr::error::EvalError;
use crate::expr::eval::{resolve_field, ExecutionBudget};
use crate::expr::value::Value;
use crate::routing::subject::SubjectPattern;
use crate::routing::template::Template;
use crate::rules::error::RegistryError;

const MAX_ROUTE_ID_LEN: usize = 128;

/// Serializable rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub route_id: String,
    pub subject: String,

    /// Simple filter: every key path must equal its literal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, serde_json::Value>,

    /// Expression filter, mutually exclusive with `filter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expr: Option<String>,

    #[serde(default)]
    pub targets: Vec<TargetSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Relative expiry, converted to `expires_at` on insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl RuleSpec {
    pub fn new(route_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            subject: subject.into(),
            filter: BTreeMap::new(),
            filter_expr: None,
            targets: Vec::new(),
            expires_at: None,
            ttl_secs: None,
        }
    }

    pub fn with_filter_expr(mut self, expr: impl Into<String>) -> Self {
        self.filter_expr = Some(expr.into());
        self
    }

    pub fn with_filter_eq(mut self, path: impl Into<String>, value: serde_json::Value) -> Self {
        self.filter.insert(path.into(), value);
        self
    }

    pub fn with_target(mut self, kind: impl Into<String>, destination: impl Into<String>) -> Self {
        self.targets.push(TargetSpec {
            kind: kind.into(),
            destination: destination.into(),
            fields: BTreeMap::new(),
        });
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub kind: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// Who manages a rule. File-managed rules are reconciled on config reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Api,
    File,
}

#[derive(Debug, Clone)]
pub enum RuleFilter {
    None,
    Simple(Vec<(FieldRef, Value)>),
    Expression(CompiledExpression),
}

impl RuleFilter {
    pub fn evaluate(&self, event: &Event, budget: &ExecutionBudget) -> Result<bool, EvalError> {
        match self {
            RuleFilter::None => Ok(true),
            RuleFilter::Simple(pairs) => Ok(pairs.iter().all(|(field, expected)| {
                match resolve_field(field, event) {
                    Some(actual) if !actual.is_null() && !expected.is_null() => {
                        actual.strict_eq(expected)
                    }
                    _ => false,
                }
            })),
            RuleFilter::Expression(expr) => expr.evaluate(event, budget),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RuleFilter::None => "none",
            RuleFilter::Simple(_) => "simple",
            RuleFilter::Expression(_) => "expression",
        }
    }
}

/// A forward target whose fields may contain placeholders.
#[derive(Debug, Clone)]
pub struct TargetTemplate {
    pub kind: String,
    pub destination: Template,
    pub fields: Vec<(String, Template)>,
}

/// A validated, compiled routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    route_id: String,
    pattern: SubjectPattern,
    filter: RuleFilter,
    targets: Vec<TargetTemplate>,
    revision: u64,
    expires_at: Option<DateTime<Utc>>,
    source: RuleSource,
    spec: RuleSpec,
}

impl RoutingRule {
    /// Validate and compile a definition. The revision is assigned by the
    /// registry when the rule is published.
    pub fn compile(
        mut spec: RuleSpec,
        compiler: &Compiler,
        source: RuleSource,
        now: DateTime<Utc>,
    ) -> Result<Self, RegistryError> {
        let route_id = spec.route_id.clone();
        let invalid = |reason: &str| RegistryError::InvalidRule {
            route_id: route_id.clone(),
            reason: reason.to_string(),
        };

        if route_id.is_empty() {
            return Err(invalid("route_id must not be empty"));
        }
        if route_id.len() > MAX_ROUTE_ID_LEN || route_id.chars().any(char::is_whitespace) {
            return Err(invalid("route_id must be at most 128 characters without whitespace"));
        }
        if spec.targets.is_empty() {
            return Err(invalid("rule needs at least one forward target"));
        }
        if !spec.filter.is_empty() && spec.filter_expr.is_some() {
            return Err(invalid("filter and filter_expr are mutually exclusive"));
        }
        if spec.expires_at.is_some() && spec.ttl_secs.is_some() {
            return Err(invalid("expires_at and ttl_secs are mutually exclusive"));
        }

        let pattern = SubjectPattern::compile(&spec.subject).map_err(|source| {
            RegistryError::InvalidPattern {
                route_id: route_id.clone(),
                source,
            }
        })?;

        let filter = if let Some(text) = &spec.filter_expr {
            let expr = compiler.compile(text).map_err(|source| RegistryError::Compile {
                route_id: route_id.clone(),
                source,
            })?;
            RuleFilter::Expression(expr)
        } else if !spec.filter.is_empty() {
            let mut pairs = Vec::with_capacity(spec.filter.len());
            for (path, literal) in &spec.filter {
                let field = FieldRef::parse(path).map_err(|source| RegistryError::Compile {
                    route_id: route_id.clone(),
                    source,
                })?;
                pairs.push((field, Value::from(literal.clone())));
            }
            RuleFilter::Simple(pairs)
        } else {
            RuleFilter::None
        };

        let template = |text: &str| {
            Template::parse(text).map_err(|reason| RegistryError::InvalidTemplate {
                route_id: route_id.clone(),
                reason,
            })
        };
        let mut targets = Vec::with_capacity(spec.targets.len());
        for target in &spec.targets {
            if target.kind.trim().is_empty() {
                return Err(invalid("target kind must not be empty"));
            }
            let mut fields = Vec::with_capacity(target.fields.len());
            for (name, text) in &target.fields {
                fields.push((name.clone(), template(text)?));
            }
            targets.push(TargetTemplate {
                kind: target.kind.clone(),
                destination: template(&target.destination)?,
                fields,
            });
        }

        if let Some(ttl) = spec.ttl_secs.take() {
            let expires_at = i64::try_from(ttl)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| invalid("ttl_secs out of range"))?;
            spec.expires_at = Some(expires_at);
        }

        Ok(Self {
            route_id,
            pattern,
            filter,
            targets,
            revision: 0,
            expires_at: spec.expires_at,
            source,
            spec,
        })
    }

    pub(crate) fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    pub fn filter(&self) -> &RuleFilter {
        &self.filter
    }

    pub fn targets(&self) -> &[TargetTemplate] {
        &self.targets
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn source(&self) -> RuleSource {
        self.source
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// The definition this rule was compiled from, with any TTL resolved
    /// to an absolute `expires_at`.
    pub fn to_spec(&self) -> RuleSpec {
        self.spec.clone()
    }

    /// True when `spec` would compile to this same rule.
    pub(crate) fn same_definition(&self, spec: &RuleSpec) -> bool {
        spec.ttl_secs.is_none() && self.spec == *spec
    }
}
