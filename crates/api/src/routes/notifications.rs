//! Queue processing triggers.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use dentease_common::error::AppError;
use dentease_engine::BatchReport;
use dentease_engine::queue::effective_batch_size;

use crate::middleware::auth::WebhookCaller;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/process", post(process_pending))
        .route("/api/notifications/{id}/process", post(process_one))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessParams {
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: BatchReport,
}

/// POST /api/notifications/process: Deliver up to `batch_size` pending rows.
///
/// The body is optional; without one the configured batch size applies.
async fn process_pending(
    State(state): State<AppState>,
    _caller: WebhookCaller,
    params: Option<Json<ProcessParams>>,
) -> Result<Json<ProcessResponse>, AppError> {
    let requested = params
        .and_then(|Json(p)| p.batch_size)
        .unwrap_or(state.config.queue_batch_size);
    let batch_size = effective_batch_size(Some(requested));

    let report = state.queue().process_pending(batch_size).await?;
    Ok(Json(ProcessResponse {
        success: true,
        report,
    }))
}

/// POST /api/notifications/:id/process: Process a single queued row.
async fn process_one(
    State(state): State<AppState>,
    _caller: WebhookCaller,
    Path(id): Path<String>,
) -> Result<Json<ProcessResponse>, AppError> {
    if id.trim().is_empty() {
        return Err(AppError::Validation("Notification id is required".to_string()));
    }

    let report = state.queue().process_one(&id).await?;
    Ok(Json(ProcessResponse {
        success: true,
        report,
    }))
}
