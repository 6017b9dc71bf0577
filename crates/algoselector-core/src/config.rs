//! Client configuration.
//!
//! [`ClientConfig`] collects everything the core needs to talk to the
//! analysis service and to pace the monitoring stage.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use algoselector_core::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .base_url("http://localhost:9000")
//!     .request_timeout(Duration::from_secs(10))
//!     .history_capacity(50)
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.base_url, "http://localhost:9000");
//! ```

use std::time::Duration;

use crate::error::PipelineError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Training runs take far longer than any other call.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_READ_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_LOGS_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Configuration shared by the gateway, the cache consumers and the monitoring stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Root URL of the analysis service, without a trailing slash.
    pub base_url: String,

    /// Deadline for every call except `run`.
    pub request_timeout: Duration,

    /// Deadline for triggering a run.
    pub run_timeout: Duration,

    /// Extra attempts for idempotent reads that fail with a remote failure.
    /// Mutations and runs are never retried.
    pub read_retries: u32,

    /// Pause between read attempts.
    pub retry_delay: Duration,

    /// How often Monitoring polls system stats.
    pub stats_interval: Duration,

    /// How often Monitoring polls system logs.
    pub logs_interval: Duration,

    /// Maximum number of stats samples kept for the time series.
    pub history_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            read_retries: DEFAULT_READ_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            logs_interval: Duration::from_secs(DEFAULT_LOGS_INTERVAL_SECS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Join an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Trailing slashes are stripped.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.config.run_timeout = timeout;
        self
    }

    pub fn read_retries(mut self, retries: u32) -> Self {
        self.config.read_retries = retries;
        self
    }

    /// `Duration::ZERO` is allowed and retries immediately.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.config.stats_interval = interval;
        self
    }

    pub fn logs_interval(mut self, interval: Duration) -> Self {
        self.config.logs_interval = interval;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Build the configuration, validating all values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if:
    /// - `base_url` is empty or not an http(s) URL
    /// - any timeout or polling interval is zero
    /// - `history_capacity` is zero
    pub fn build(self) -> Result<ClientConfig, PipelineError> {
        let config = self.config;

        if config.base_url.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(PipelineError::InvalidConfig(format!(
                "base_url must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }

        if config.request_timeout.is_zero() || config.run_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "request_timeout and run_timeout must be greater than zero".to_string(),
            ));
        }

        if config.stats_interval.is_zero() || config.logs_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "stats_interval and logs_interval must be greater than zero".to_string(),
            ));
        }

        if config.history_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "history_capacity must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}
