//! Shared-secret check for webhook callers.
//!
//! When `WEBHOOK_SECRET` is configured every entry point requires
//! `Authorization: Bearer <secret>`. Without it the routes are open, which is
//! what local runs and the database's own triggers use.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use dentease_common::error::AppError;

use crate::state::AppState;

/// Marker extractor: present on a handler means the caller passed the secret check.
#[derive(Debug, Clone, Copy)]
pub struct WebhookCaller;

/// Compare without short-circuiting on the first differing byte.
fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check an `Authorization` header value against the configured secret.
pub fn authorize(header: Option<&str>, secret: Option<&str>) -> Result<(), AppError> {
    let Some(secret) = secret else {
        return Ok(());
    };

    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| {
            AppError::Auth("Missing Authorization header. Use 'Bearer <secret>'".to_string())
        })?;

    if secrets_match(token, secret) {
        Ok(())
    } else {
        Err(AppError::Auth("Invalid webhook secret".to_string()))
    }
}

impl FromRequestParts<AppState> for WebhookCaller {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = authorize(
            parts
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok()),
            state.config.webhook_secret.as_deref(),
        );

        async move {
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Rejected webhook call");
            }
            result.map(|_| WebhookCaller)
        }
    }
}
