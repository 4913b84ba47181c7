//! Concrete delivery gateways.
//!
//! - [`fcm::FcmGateway`]: FCM HTTP v1 with a cached OAuth bearer token
//! - [`dry_run::DryRunGateway`]: logs pushes, used for local runs

pub mod credentials;
pub mod dry_run;
pub mod fcm;

use std::sync::Arc;

use dentease_common::config::AppConfig;
use dentease_common::gateway::{DeliveryGateway, GatewayError};

pub use credentials::{CredentialCache, ServiceAccount};
pub use dry_run::DryRunGateway;
pub use fcm::FcmGateway;

/// Pick the gateway the configuration asks for.
///
/// Outside dry-run mode a readable service account is required.
pub fn gateway_from_config(config: &AppConfig) -> Result<Arc<dyn DeliveryGateway>, GatewayError> {
    if config.push_dry_run {
        tracing::warn!("PUSH_DRY_RUN is set; pushes will be logged, not sent");
        return Ok(Arc::new(DryRunGateway));
    }

    let path = config.fcm_service_account_path.as_deref().ok_or_else(|| {
        GatewayError::Config(
            "FCM_SERVICE_ACCOUNT_PATH is required unless PUSH_DRY_RUN is set".to_string(),
        )
    })?;

    let account = ServiceAccount::from_file(path)?;
    tracing::info!(project_id = %account.project_id, "Using FCM delivery gateway");
    Ok(Arc::new(FcmGateway::new(account)?))
}
