// GET handlers: version, snapshot, history, stats

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::models::unix_millis;

/// Package name (from Cargo.toml).
const NAME: &str = env!("CARGO_PKG_NAME");
/// Package version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// History window when the query gives no `from`.
const DEFAULT_HISTORY_WINDOW_MS: u64 = 60 * 60 * 1000;

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/snapshot: latest sample of every source plus the generation.
pub(super) async fn snapshot_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.get_snapshot())
}

pub(super) async fn source_handler(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Response {
    match state.monitor.get_snapshot().sources.remove(&source_id) {
        Some(sample) => Json(sample).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("unknown source {}", source_id),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryParams {
    from: Option<u64>,
    to: Option<u64>,
}

/// GET /api/history/{source_id}?from=&to=: inclusive range in Unix ms; defaults to the last hour.
pub(super) async fn history_handler(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let to = params.to.unwrap_or_else(unix_millis);
    let from = params
        .from
        .unwrap_or_else(|| to.saturating_sub(DEFAULT_HISTORY_WINDOW_MS));
    if from > to {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("from ({}) is after to ({})", from, to),
        );
    }
    match state.monitor.get_history(&source_id, from, to).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, source_id = %source_id, operation = "get_history", "history query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "history query failed".into())
        }
    }
}

/// GET /api/stats: process counters, connected viewers, current generation.
pub(super) async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "counters": state.monitor.stats(),
        "viewers": state.monitor.hub().viewer_count(),
        "generation": state.monitor.generation(),
    }))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
