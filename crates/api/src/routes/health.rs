//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "dentease-notify-api",
        "version": env!("CARGO_PKG_VERSION"),
        "dispatch_mode": match state.config.dispatch_mode {
            dentease_common::config::DispatchMode::Immediate => "immediate",
            dentease_common::config::DispatchMode::Queued => "queued",
        },
    }))
}
