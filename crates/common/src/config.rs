use serde::Deserialize;

/// How the dispatcher handles an inbound event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Send synchronously and record the terminal outcome.
    #[default]
    Immediate,
    /// Insert `pending` rows for the queue processor to deliver later.
    Queued,
}

impl std::str::FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(DispatchMode::Immediate),
            "queued" => Ok(DispatchMode::Queued),
            other => Err(anyhow::anyhow!(
                "DISPATCH_MODE must be 'immediate' or 'queued', got '{}'",
                other
            )),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// HTTP listen port for the API (default: 3000)
    pub api_port: u16,

    /// Shared secret webhook callers must present as a bearer token
    pub webhook_secret: Option<String>,

    /// Path to the push provider service-account JSON
    pub fcm_service_account_path: Option<String>,

    /// Log pushes instead of sending them
    pub push_dry_run: bool,

    /// Immediate send or queue-and-process
    pub dispatch_mode: DispatchMode,

    /// Default queue batch size (capped by the processor)
    pub queue_batch_size: usize,

    /// Scheduler tick in seconds (default: 30)
    pub queue_poll_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            fcm_service_account_path: std::env::var("FCM_SERVICE_ACCOUNT_PATH").ok(),
            push_dry_run: std::env::var("PUSH_DRY_RUN")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            dispatch_mode: std::env::var("DISPATCH_MODE")
                .unwrap_or_else(|_| "immediate".to_string())
                .parse()?,
            queue_batch_size: std::env::var("QUEUE_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_BATCH_SIZE must be a valid usize"))?,
            queue_poll_interval_secs: std::env::var("QUEUE_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_POLL_INTERVAL_SECS must be a valid u64"))?,
        })
    }
}
