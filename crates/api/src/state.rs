//! Shared application state for the Axum API server.

use std::sync::Arc;

use dentease_common::config::AppConfig;
use dentease_common::gateway::DeliveryGateway;
use dentease_common::store::Datastore;
use dentease_engine::{Dispatcher, QueueProcessor};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Datastore>,
    pub gateway: Arc<dyn DeliveryGateway>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn DeliveryGateway>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// A dispatcher for one request. Construction is cheap.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.store.clone(),
            self.gateway.clone(),
            self.config.dispatch_mode,
        )
    }

    pub fn queue(&self) -> QueueProcessor {
        QueueProcessor::new(self.store.clone(), self.gateway.clone())
    }
}
