use std::time::Duration;

/// Container engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for inspect, start, remove, list and ping.
    pub short_timeout: Duration,
    /// Deadline for create, which may pull the image.
    pub create_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub stop_grace: Duration,
    /// Overall ceiling for a stop call.
    pub stop_timeout: Duration,
    /// Deadline for wait.
    pub wait_timeout: Duration,
    /// json-file log driver `max-size`.
    pub log_max_size: String,
    /// json-file log driver `max-file`.
    pub log_max_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_timeout: Duration::from_secs(10),
            create_timeout: Duration::from_secs(360),
            stop_grace: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(10),
            log_max_size: "100m".into(),
            log_max_file: "3".into(),
        }
    }
}

/// Minimum headroom between the stop grace period and the stop ceiling, so
/// a unit killed at the end of its grace period is still reported in time.
pub const STOP_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum EngineConfigError {
    #[error("{key} must be a whole number of seconds, got '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error(
        "stop timeout ({timeout:?}) must exceed stop grace ({grace:?}) by at least {margin:?}",
        margin = STOP_MARGIN
    )]
    StopCeilingTooShort { grace: Duration, timeout: Duration },
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `ENGINE_SHORT_TIMEOUT_SECS`  | `10`    |
    /// | `ENGINE_CREATE_TIMEOUT_SECS` | `360`   |
    /// | `ENGINE_STOP_GRACE_SECS`     | `15`    |
    /// | `ENGINE_STOP_TIMEOUT_SECS`   | `30`    |
    /// | `ENGINE_WAIT_TIMEOUT_SECS`   | `10`    |
    /// | `ENGINE_LOG_MAX_SIZE`        | `100m`  |
    /// | `ENGINE_LOG_MAX_FILE`        | `3`     |
    ///
    /// The engine endpoint itself comes from `DOCKER_HOST`, read by the
    /// client library.
    pub fn from_env() -> Result<Self, EngineConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EngineConfigError> {
        let defaults = Self::default();
        let secs = |key: &'static str, default: Duration| match lookup(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| EngineConfigError::Invalid { key, value: raw }),
            None => Ok(default),
        };

        let config = Self {
            short_timeout: secs("ENGINE_SHORT_TIMEOUT_SECS", defaults.short_timeout)?,
            create_timeout: secs("ENGINE_CREATE_TIMEOUT_SECS", defaults.create_timeout)?,
            stop_grace: secs("ENGINE_STOP_GRACE_SECS", defaults.stop_grace)?,
            stop_timeout: secs("ENGINE_STOP_TIMEOUT_SECS", defaults.stop_timeout)?,
            wait_timeout: secs("ENGINE_WAIT_TIMEOUT_SECS", defaults.wait_timeout)?,
            log_max_size: lookup("ENGINE_LOG_MAX_SIZE").unwrap_or(defaults.log_max_size),
            log_max_file: lookup("ENGINE_LOG_MAX_FILE").unwrap_or(defaults.log_max_file),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject a stop ceiling that would expire before the engine escalates
    /// to SIGKILL.
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.stop_grace + STOP_MARGIN > self.stop_timeout {
            return Err(EngineConfigError::StopCeilingTooShort {
                grace: self.stop_grace,
                timeout: self.stop_timeout,
            });
        }
        Ok(())
    }
}
