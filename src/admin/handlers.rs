use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admin::AdminState;
use crate::event::Event;
use crate::observability::metrics::{CounterSnapshot, RouteStats};
use crate::routing::dispatcher::ForwardTarget;
use crate::rules::command::{CommandOutcome, RuleCommand};
use crate::rules::error::RegistryError;
use crate::rules::rule::{RoutingRule, RuleSource, TargetSpec};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub rules: usize,
    pub revision: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RuleView {
    pub route_id: String,
    pub subject: String,
    pub filter_kind: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub revision: u64,
    pub source: RuleSource,
    pub targets: Vec<TargetSpec>,
}

impl From<&RoutingRule> for RuleView {
    fn from(rule: &RoutingRule) -> Self {
        let spec = rule.to_spec();
        Self {
            route_id: spec.route_id,
            subject: spec.subject,
            filter_kind: rule.filter().kind().to_string(),
            filter: spec.filter,
            filter_expr: spec.filter_expr,
            expires_at: rule.expires_at(),
            revision: rule.revision(),
            source: rule.source(),
            targets: spec.targets,
        }
    }
}

#[derive(Serialize)]
pub struct StatsView {
    pub totals: CounterSnapshot,
    pub routes: HashMap<String, RouteStats>,
}

/// Sample event for a dry run.
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub subject: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RouteMatchView {
    pub route_id: String,
    pub revision: u64,
    pub targets: Vec<ForwardTarget>,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub event_id: Uuid,
    pub revision: u64,
    pub matches: Vec<RouteMatchView>,
}

/// Registry errors rendered as JSON with a matching status code.
pub struct AdminError(RegistryError);

impl From<RegistryError> for AdminError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::DuplicateRoute(_) => StatusCode::CONFLICT,
            RegistryError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.registry.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        rules: snapshot.len(),
        revision: snapshot.revision(),
        started_at: state.started_at,
    })
}

pub async fn list_rules(State(state): State<AdminState>) -> Json<Vec<RuleView>> {
    let snapshot = state.registry.snapshot();
    Json(snapshot.rules().iter().map(|r| RuleView::from(r.as_ref())).collect())
}

pub async fn get_rule(
    State(state): State<AdminState>,
    Path(route_id): Path<String>,
) -> Result<Json<RuleView>, AdminError> {
    state
        .registry
        .get(&route_id)
        .map(|r| Json(RuleView::from(r.as_ref())))
        .ok_or(AdminError(RegistryError::RouteNotFound(route_id)))
}

pub async fn apply_command(
    State(state): State<AdminState>,
    Json(command): Json<RuleCommand>,
) -> Result<(StatusCode, Json<CommandOutcome>), AdminError> {
    let outcome = state.registry.apply(command)?;
    let status = match outcome {
        CommandOutcome::Added { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

pub async fn delete_rule(
    State(state): State<AdminState>,
    Path(route_id): Path<String>,
) -> Result<Json<CommandOutcome>, AdminError> {
    let outcome = state.registry.apply(RuleCommand::Remove { route_id })?;
    Ok(Json(outcome))
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<StatsView> {
    Json(StatsView {
        totals: state.counters.snapshot(),
        routes: state.counters.all_route_stats().into_iter().collect(),
    })
}

/// Route a sample event without delivering it.
pub async fn dry_run_route(
    State(state): State<AdminState>,
    Json(request): Json<RouteRequest>,
) -> Json<RouteResponse> {
    let event = Event::new(request.subject, request.headers, request.payload.to_string());
    let result = state.dispatcher.match_event(&event);

    Json(RouteResponse {
        event_id: result.event_id,
        revision: result.revision,
        matches: result
            .matches
            .into_iter()
            .map(|m| RouteMatchView {
                route_id: m.rule.route_id().to_string(),
                revision: m.rule.revision(),
                targets: m.targets,
            })
            .collect(),
    })
}
