use async_trait::async_trait;

use dentease_common::gateway::{DeliveryGateway, GatewayError, PushMessage};
use dentease_common::types::DeliveryTarget;

/// Gateway that logs instead of sending. Every push succeeds.
#[derive(Debug, Default, Clone)]
pub struct DryRunGateway;

#[async_trait]
impl DeliveryGateway for DryRunGateway {
    async fn send(&self, target: &DeliveryTarget, message: &PushMessage) -> Result<(), GatewayError> {
        tracing::info!(
            destination = %target.redacted(),
            title = %message.title,
            priority = %message.priority,
            event_type = message.data.get("type").map(String::as_str).unwrap_or(""),
            "[dry-run] push not sent"
        );
        Ok(())
    }
}
