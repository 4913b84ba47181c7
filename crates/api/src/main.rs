//! DentEase notification API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use dentease_common::config::AppConfig;
use dentease_common::db::create_pool;
use dentease_common::store::PgDatastore;
use dentease_notifier::gateway_from_config;

use dentease_api::routes::create_router;
use dentease_api::state::AppState;

/// Webhook bodies are single rows; anything larger is not ours.
const MAX_BODY_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("dentease_api=debug,dentease_engine=debug,dentease_notifier=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting DentEase notification API...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config, "dentease-api").await?;
    let store = Arc::new(PgDatastore::new(pool));

    let gateway = gateway_from_config(&config)?;

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET is not set; entry points accept unauthenticated calls");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(dispatch_mode = ?config.dispatch_mode, "Engine configured");

    let state = AppState::new(store, gateway, config);

    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
