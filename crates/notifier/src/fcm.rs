//! FCM HTTP v1 delivery gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use dentease_common::gateway::{DeliveryGateway, GatewayError, PushMessage};
use dentease_common::types::{DeliveryTarget, Priority};

use crate::credentials::{CredentialCache, ServiceAccount, ServiceAccountExchange};

pub const DEFAULT_API_BASE: &str = "https://fcm.googleapis.com";
pub const ANDROID_CHANNEL_ID: &str = "fcm_default_channel";
const REQUEST_TIMEOUT_SECS: u64 = 15;

pub struct FcmGateway {
    client: reqwest::Client,
    credentials: CredentialCache,
    project_id: String,
    api_base: String,
}

impl FcmGateway {
    pub fn new(account: ServiceAccount) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            project_id: account.project_id.clone(),
            credentials: CredentialCache::new(ServiceAccountExchange::new(account, client.clone())),
            client,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point the sender at another host, e.g. a local emulator.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.api_base.trim_end_matches('/'),
            self.project_id
        )
    }
}

/// Build the v1 `{"message": ...}` request body.
pub fn build_request(target: &DeliveryTarget, message: &PushMessage) -> Value {
    let priority = match message.priority {
        Priority::High => "high",
        Priority::Normal => "normal",
    };

    let mut body = json!({
        "notification": {
            "title": message.title,
            "body": message.body,
        },
        "data": message.data,
    });

    match target {
        DeliveryTarget::Token(token) => {
            body["token"] = json!(token);
            body["android"] = json!({
                "priority": priority,
                "notification": {
                    "sound": "default",
                    "channel_id": ANDROID_CHANNEL_ID,
                },
            });
            body["apns"] = json!({
                "headers": {
                    "apns-priority": if message.priority == Priority::High { "10" } else { "5" },
                },
                "payload": {
                    "aps": { "sound": "default", "badge": 1 },
                },
            });
        }
        DeliveryTarget::Topic(topic) => {
            body["topic"] = json!(topic);
            body["android"] = json!({ "priority": "high" });
        }
    }

    json!({ "message": body })
}

#[async_trait]
impl DeliveryGateway for FcmGateway {
    async fn send(&self, target: &DeliveryTarget, message: &PushMessage) -> Result<(), GatewayError> {
        let access_token = self.credentials.get_valid_token().await?;

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&build_request(target, message))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(destination = %target.redacted(), "FCM accepted message");
            return Ok(());
        }

        if status.as_u16() == 401 {
            self.credentials.invalidate().await;
        }

        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

/// Provider error bodies can be large; keep what fits in `push_error`.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() <= MAX {
        return body.to_string();
    }
    let mut out: String = body.chars().take(MAX).collect();
    out.push_str("...");
    out
}
