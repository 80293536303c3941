use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Config {
    /// Load configuration from a YAML file. A missing file is not an error;
    /// it yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_yaml::from_str(&contents)?)
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_analytics_ttl() -> u64 {
    86400
}

fn default_response_time_cap() -> usize {
    50
}

fn default_aggregation_window_hours() -> u64 {
    24
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_pop_timeout_ms() -> u64 {
    5000
}

fn default_worker_cooldown_ms() -> u64 {
    5000
}

fn default_scheduler_interval_ms() -> u64 {
    250
}

fn default_retention_hours() -> u64 {
    24
}

fn default_alert_threshold_ms() -> u64 {
    5000
}

fn default_alert_interval_secs() -> u64 {
    60
}

fn default_prune_interval_secs() -> u64 {
    3600
}

fn default_rolling_window() -> usize {
    1000
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// TTL of the cached session context, in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

// ============================================================================
// AnalyticsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AnalyticsConfig {
    /// TTL of cached analytics records, in seconds.
    #[serde(default = "default_analytics_ttl")]
    pub ttl_seconds: u64,
    /// Cap on the rolling response-time list kept per session.
    #[serde(default = "default_response_time_cap")]
    pub response_time_cap: usize,
    /// Window considered by the aggregation batch job.
    #[serde(default = "default_aggregation_window_hours")]
    pub aggregation_window_hours: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_analytics_ttl(),
            response_time_cap: default_response_time_cap(),
            aggregation_window_hours: default_aggregation_window_hours(),
        }
    }
}

impl AnalyticsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn aggregation_window(&self) -> Duration {
        Duration::from_secs(self.aggregation_window_hours * 3600)
    }
}

// ============================================================================
// QueueConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay; doubles per attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,
    #[serde(default = "default_worker_cooldown_ms")]
    pub worker_cooldown_ms: u64,
    #[serde(default = "default_scheduler_interval_ms")]
    pub scheduler_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
            worker_cooldown_ms: default_worker_cooldown_ms(),
            scheduler_interval_ms: default_scheduler_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn settings(&self) -> crate::queue::QueueSettings {
        crate::queue::QueueSettings {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            pop_timeout: Duration::from_millis(self.pop_timeout_ms),
            worker_cooldown: Duration::from_millis(self.worker_cooldown_ms),
            scheduler_interval: Duration::from_millis(self.scheduler_interval_ms),
        }
    }
}

// ============================================================================
// MonitorConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Latency samples older than this are pruned.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_alert_threshold_ms")]
    pub alert_threshold_ms: u64,
    #[serde(default = "default_alert_interval_secs")]
    pub alert_interval_seconds: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_seconds: u64,
    /// Cap on the per-session rolling latency list.
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            alert_threshold_ms: default_alert_threshold_ms(),
            alert_interval_seconds: default_alert_interval_secs(),
            prune_interval_seconds: default_prune_interval_secs(),
            rolling_window: default_rolling_window(),
        }
    }
}

impl MonitorConfig {
    pub fn settings(&self, session_ttl: Duration) -> crate::monitor::MonitorSettings {
        crate::monitor::MonitorSettings {
            retention: Duration::from_secs(self.retention_hours * 3600),
            alert_threshold: Duration::from_millis(self.alert_threshold_ms),
            alert_interval: Duration::from_secs(self.alert_interval_seconds),
            prune_interval: Duration::from_secs(self.prune_interval_seconds),
            rolling_window: self.rolling_window,
            session_ttl,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
