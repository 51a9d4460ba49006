use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Emit JSON logs instead of the pretty formatter.
    pub json_logs: bool,

    /// Max pooled connections shared by every component.
    ///
    /// One long-lived pool replaces per-publish connections; the pool size is
    /// the upper bound on concurrent storage round-trips.
    pub db_max_connections: u32,

    // =========================
    // Fulfillment queue
    // =========================
    /// Routing key shared by all producers and consumers.
    pub queue_routing_key: String,

    /// How long a received message stays invisible to other consumers.
    ///
    /// A consumer that crashes mid-handler loses its lease after this
    /// interval and the message is redelivered.
    pub queue_visibility_timeout: Duration,

    /// Deliveries allowed before a message is parked as dead.
    pub max_delivery_attempts: u32,

    /// First redelivery delay; doubles per attempt up to `retry_max_delay`.
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    // =========================
    // Workers
    // =========================
    /// Number of competing finalizer consumers.
    pub finalizer_workers: usize,

    /// Idle wait between empty queue polls.
    pub finalizer_poll_interval: Duration,

    /// Max outbox rows relayed per pass.
    ///
    /// Acts as backpressure: the relay publishes at most this many
    /// instructions before re-reading the outbox.
    pub relay_batch_size: usize,

    /// Idle wait between empty outbox scans.
    pub relay_poll_interval: Duration,

    /// How long dispatched outbox rows and settled promotion claims are kept.
    pub outbox_retention: Duration,

    /// Cadence of the relay's retention sweep.
    pub outbox_sweep_interval: Duration,

    /// Time given to workers to finish their current job on shutdown.
    pub shutdown_grace: Duration,

    // =========================
    // Notifications
    // =========================
    /// Webhook receiving rendered notifications. `None` logs them instead.
    pub notify_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://booking_dev.db?mode=rwc".to_string());

        Self {
            database_url,
            json_logs: Self::json_logs_from_env(),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 16),

            queue_routing_key: std::env::var("QUEUE_ROUTING_KEY")
                .unwrap_or_else(|_| "booking_queue".to_string()),
            queue_visibility_timeout: Duration::from_millis(env_or(
                "QUEUE_VISIBILITY_TIMEOUT_MS",
                30_000,
            )),
            max_delivery_attempts: env_or("MAX_DELIVERY_ATTEMPTS", 5),
            retry_base_delay: Duration::from_millis(env_or("RETRY_BASE_DELAY_MS", 500)),
            retry_max_delay: Duration::from_millis(env_or("RETRY_MAX_DELAY_MS", 60_000)),

            finalizer_workers: env_or("FINALIZER_WORKERS", 2),
            finalizer_poll_interval: Duration::from_millis(env_or(
                "FINALIZER_POLL_INTERVAL_MS",
                250,
            )),
            relay_batch_size: env_or("RELAY_BATCH_SIZE", 64),
            relay_poll_interval: Duration::from_millis(env_or("RELAY_POLL_INTERVAL_MS", 100)),
            outbox_retention: Duration::from_millis(env_or("OUTBOX_RETENTION_MS", 86_400_000)),
            outbox_sweep_interval: Duration::from_millis(env_or(
                "OUTBOX_SWEEP_INTERVAL_MS",
                60_000,
            )),
            shutdown_grace: Duration::from_millis(env_or("SHUTDOWN_GRACE_MS", 10_000)),

            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    /// Read on its own so logging can start before the rest of the config.
    pub fn json_logs_from_env() -> bool {
        std::env::var("APP_ENV").unwrap_or_default() == "production"
    }

    /// Settings for tests and local tooling: fast polling, short leases.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            json_logs: false,
            db_max_connections: 5,
            queue_routing_key: "booking_queue".to_string(),
            queue_visibility_timeout: Duration::from_secs(5),
            max_delivery_attempts: 3,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            finalizer_workers: 1,
            finalizer_poll_interval: Duration::from_millis(10),
            relay_batch_size: 16,
            relay_poll_interval: Duration::from_millis(10),
            outbox_retention: Duration::from_secs(60 * 60),
            outbox_sweep_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(2),
            notify_webhook_url: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    parse_or(key, std::env::var(key).ok(), default)
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable config value; using default");
            default
        }),
        None => default,
    }
}
