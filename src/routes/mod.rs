// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::monitor::Monitor;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) monitor: Monitor,
}

pub fn app(monitor: Monitor) -> Router {
    let state = AppState { monitor };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/snapshot", get(http::snapshot_handler)) // GET /api/snapshot
        .route("/api/snapshot/{source_id}", get(http::source_handler)) // GET /api/snapshot/{source_id}
        .route("/api/history/{source_id}", get(http::history_handler)) // GET /api/history/{source_id}
        .route("/api/stats", get(http::stats_handler)) // GET /api/stats
        .route("/ws", get(ws::ws_handler)) // WS /ws?topics=a,b
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
