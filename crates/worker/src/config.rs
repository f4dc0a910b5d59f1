use std::time::Duration;

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Commands processed concurrently.
    pub concurrency: usize,
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Ceiling on attempts per command, including the first.
    pub max_attempts: u32,
    /// Delay before a failed command becomes claimable again.
    pub retry_delay: Duration,
    /// Claims older than this are presumed dead and re-queued.
    pub lease: Duration,
    pub reconciler_enabled: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default    |
    /// |----------------------------|------------|
    /// | `DATABASE_URL`             | (required) |
    /// | `WORKER_CONCURRENCY`       | `10`       |
    /// | `WORKER_POLL_INTERVAL_MS`  | `1000`     |
    /// | `COMMAND_MAX_ATTEMPTS`     | `2`        |
    /// | `COMMAND_RETRY_DELAY_SECS` | `5`        |
    /// | `COMMAND_LEASE_SECS`       | `600`      |
    /// | `RECONCILER_ENABLED`       | `true`     |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        let poll_interval_ms: u64 = std::env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("WORKER_POLL_INTERVAL_MS must be a valid u64");

        let max_attempts: u32 = std::env::var("COMMAND_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("COMMAND_MAX_ATTEMPTS must be a valid u32");

        let retry_delay_secs: u64 = std::env::var("COMMAND_RETRY_DELAY_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("COMMAND_RETRY_DELAY_SECS must be a valid u64");

        let lease_secs: u64 = std::env::var("COMMAND_LEASE_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("COMMAND_LEASE_SECS must be a valid u64");

        let reconciler_enabled: bool = std::env::var("RECONCILER_ENABLED")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .expect("RECONCILER_ENABLED must be true or false");

        Self {
            database_url,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::from_secs(retry_delay_secs),
            lease: Duration::from_secs(lease_secs),
            reconciler_enabled,
        }
    }
}
