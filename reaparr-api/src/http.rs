//! HTTP operations surface
//!
//! Health plus the control endpoints the orchestrator exposes: status,
//! run-now, lock reset, full sync, velocity cleanup. JSON in and out, no
//! authentication (this listens on the household LAN, like the services it
//! talks to).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use reaparr_core::service::Orchestrator;

use crate::error::AppResult;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/run", post(run_now))
        .route("/api/run/emergency", post(run_emergency))
        .route("/api/lock/reset", post(reset_lock))
        .route("/api/sync/full", post(force_full_sync))
        .route("/api/velocity-cleanup/run", post(run_velocity_cleanup))
        .route("/api/velocity-cleanup/status", get(velocity_cleanup_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.orchestrator.status()).unwrap_or(Value::Null))
}

#[derive(Debug, Default, Deserialize)]
struct RunParams {
    #[serde(default)]
    dry_run: bool,
}

async fn run_now(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> AppResult<Json<Value>> {
    let result = state.orchestrator.run_now(params.dry_run).await?;
    Ok(Json(result))
}

async fn run_emergency(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let result = state.orchestrator.run_emergency_now().await?;
    Ok(Json(result))
}

async fn reset_lock(State(state): State<AppState>) -> Json<Value> {
    state.orchestrator.reset_lock();
    Json(json!({ "reset": true }))
}

async fn force_full_sync(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let result = state.orchestrator.force_full_sync().await?;
    Ok(Json(result))
}

async fn run_velocity_cleanup(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> AppResult<Json<Value>> {
    let result = state
        .orchestrator
        .run_velocity_cleanup_now(params.dry_run)
        .await?;
    Ok(Json(result))
}

async fn velocity_cleanup_status(State(state): State<AppState>) -> Json<Value> {
    match state.orchestrator.velocity_cleanup_status() {
        Some(summary) => Json(serde_json::to_value(summary).unwrap_or(Value::Null)),
        None => Json(json!({ "last_run": null })),
    }
}
