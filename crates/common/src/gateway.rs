//! Delivery Gateway capability.
//!
//! The engine hands a rendered [`PushMessage`] and a [`DeliveryTarget`] to a
//! gateway and only learns success or failure. Provider authentication lives
//! entirely behind this trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{DeliveryTarget, Priority};

/// Everything the transport needs to render one push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// Structured payload forwarded to the client. Values are always strings.
    pub data: BTreeMap<String, String>,
    pub priority: Priority,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Provider rejected push with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Deliver one message to a device token or a broadcast topic.
    async fn send(&self, target: &DeliveryTarget, message: &PushMessage)
    -> Result<(), GatewayError>;
}
