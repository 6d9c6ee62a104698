//! Admin HTTP API.
//!
//! # Responsibilities
//! - Inspect live rules, counters and registry revision
//! - Add, replace, update and remove API-managed rules
//! - Dry-run routing of a sample event
//!
//! Every route sits behind bearer-token authentication.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::RouterRuntime;
use crate::observability::metrics::RouterCounters;
use crate::routing::dispatcher::Dispatcher;
use crate::rules::registry::RuleRegistry;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<RuleRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub counters: Arc<RouterCounters>,
    pub api_key: Arc<str>,
    pub started_at: DateTime<Utc>,
}

impl AdminState {
    pub fn new(runtime: &RouterRuntime, api_key: &str) -> Self {
        Self {
            registry: runtime.registry.clone(),
            dispatcher: runtime.dispatcher.clone(),
            counters: runtime.counters.clone(),
            api_key: Arc::from(api_key),
            started_at: Utc::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/rules", get(list_rules).post(apply_command))
        .route("/admin/rules/{route_id}", get(get_rule).delete(delete_rule))
        .route("/admin/stats", get(get_stats))
        .route("/admin/route", post(dry_run_route))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let app = setup_admin_router(state);
    tracing::info!(address = ?listener.local_addr().ok(), "Admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Admin API shutting down");
        })
        .await
}
