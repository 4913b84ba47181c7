use std::sync::Arc;

use dentease_common::config::AppConfig;
use dentease_common::db;
use dentease_common::store::PgDatastore;
use dentease_engine::QueueProcessor;
use dentease_notifier::gateway_from_config;
use dentease_scheduler::poller::QueuePoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dentease_scheduler=info,dentease_engine=info,dentease_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("DentEase queue scheduler starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config, "dentease-scheduler").await?;
    let store = Arc::new(PgDatastore::new(pool));
    let gateway = gateway_from_config(&config)?;

    let poller = QueuePoller::new(
        QueueProcessor::new(store, gateway),
        config.queue_batch_size,
        config.queue_poll_interval_secs,
    );

    tokio::select! {
        _ = poller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("DentEase queue scheduler stopped.");
    Ok(())
}
