//! Event intake: row-change webhooks and direct notification calls.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use dentease_engine::DispatchReport;

use crate::middleware::auth::WebhookCaller;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/push", post(push_event))
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: DispatchReport,
}

/// POST /api/push: Route one event and deliver its notifications.
///
/// Malformed or unroutable bodies are acknowledged with a detail rather than
/// rejected, so the caller's webhook does not retry them.
async fn push_event(
    State(state): State<AppState>,
    _caller: WebhookCaller,
    Json(payload): Json<Value>,
) -> Json<PushResponse> {
    let report = state.dispatcher().dispatch_json(payload).await;

    tracing::info!(
        sent = report.sent,
        skipped = report.skipped,
        errors = report.errors,
        escalated = report.escalated,
        queued = report.queued,
        "Push request handled"
    );

    Json(PushResponse {
        success: true,
        report,
    })
}
