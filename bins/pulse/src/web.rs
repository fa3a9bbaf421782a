#![cfg(feature = "web-api")]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use pulse_core::cfg::{ConfigPatch, ValidationError};
use crate::control::{ControlError, ControlSurface};
use crate::module::{Module, ModuleCtx};

type AppState = Arc<ControlSurface>;

#[derive(Deserialize)]
struct LogsQuery { limit: Option<i64> }

pub struct WebServer {
    pub http_addr: SocketAddr,
}

impl WebServer {
    pub fn new(http_addr: SocketAddr) -> Self { Self { http_addr } }
}

impl Module for WebServer {
    fn name(&self) -> &'static str { "web" }

    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let app = router(ctx.control.clone());
            let listener = tokio::net::TcpListener::bind(self.http_addr).await?;
            info!("web http listening on http://{}", self.http_addr);

            let mut shutdown = ctx.shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await?;
            Ok(())
        })
    }
}

pub fn router(control: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/stats", get(stats))
        .route("/health/jobs", get(jobs_list))
        .route("/health/jobs/:id", get(job_get))
        .route("/health/jobs/:id/start", post(job_start))
        .route("/health/jobs/:id/stop", post(job_stop))
        .route("/health/jobs/:id/trigger", post(job_trigger))
        .route("/health/check", post(check))
        .route("/health/config", get(config_get).put(config_put))
        .route("/health/logs", get(logs_get).delete(logs_clear))
        .route("/health/recover", post(recover))
        .with_state(control)
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        match self {
            ControlError::NotFound(id) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "not_found", "id": id}))).into_response()
            }
            ControlError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "validation", "message": e.to_string(), "fields": e.errors})),
            )
                .into_response(),
        }
    }
}

// The process's own liveness endpoint; this is what the health job probes.
async fn liveness() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn stats(State(cs): State<AppState>) -> impl IntoResponse {
    Json(cs.get_stats())
}

async fn jobs_list(State(cs): State<AppState>) -> impl IntoResponse {
    Json(cs.list_job_statuses())
}

async fn job_get(Path(id): Path<String>, State(cs): State<AppState>) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(cs.get_job_status(&id)?))
}

async fn job_start(Path(id): Path<String>, State(cs): State<AppState>) -> Result<impl IntoResponse, ControlError> {
    let changed = cs.start_job(&id)?;
    Ok(Json(json!({"ok": changed})))
}

async fn job_stop(Path(id): Path<String>, State(cs): State<AppState>) -> Result<impl IntoResponse, ControlError> {
    let changed = cs.stop_job(&id)?;
    Ok(Json(json!({"ok": changed})))
}

async fn job_trigger(Path(id): Path<String>, State(cs): State<AppState>) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(cs.trigger_job(&id).await?))
}

async fn check(State(cs): State<AppState>) -> impl IntoResponse {
    Json(cs.trigger_check().await)
}

async fn config_get(State(cs): State<AppState>) -> impl IntoResponse {
    Json(cs.get_config())
}

async fn config_put(
    State(cs): State<AppState>,
    payload: Result<Json<ConfigPatch>, JsonRejection>,
) -> Result<impl IntoResponse, ControlError> {
    // malformed bodies share the validation response shape
    let Json(patch) = payload.map_err(|r| ValidationError::field("body", r.body_text()))?;
    Ok(Json(cs.update_config(&patch)?))
}

async fn logs_get(State(cs): State<AppState>, Query(q): Query<LogsQuery>) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(cs.get_recent_logs(q.limit.unwrap_or(100))?))
}

async fn logs_clear(State(cs): State<AppState>) -> impl IntoResponse {
    cs.clear_logs();
    Json(json!({"ok": true}))
}

async fn recover(State(cs): State<AppState>) -> impl IntoResponse {
    Json(cs.recover_errors())
}
