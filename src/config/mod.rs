use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read from the environment (and `.env`) by all
/// three binaries. Only the connection URLs are required.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gateway bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the work queue
    pub redis_url: String,

    /// Where uploaded originals wait for a worker
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where compressed outputs are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    /// Worker tasks per worker process
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Idle sleep when the queue is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Back-off after a store or queue fault
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How often a busy worker refreshes its job's heartbeat
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Heartbeat age after which an in-progress job is presumed orphaned
    #[serde(default = "default_overdue_threshold_secs")]
    pub overdue_threshold_secs: u64,

    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,

    /// Reclaims allowed per job before it is failed for good
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Age after which a pending job with no worker is pushed onto the queue
    /// again. Jobs still sitting in the queue are skipped, so a long backlog
    /// costs one queue read per sweep rather than duplicate entries.
    #[serde(default = "default_stranded_grace_secs")]
    pub stranded_grace_secs: u64,

    /// How long a stopping worker process waits for in-flight jobs
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Prometheus listener for the watchdog process
    #[serde(default = "default_watchdog_metrics_addr")]
    pub watchdog_metrics_addr: SocketAddr,

    /// Prometheus listener for the worker pool process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: SocketAddr,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("compressed")
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_secs() -> u64 {
    3
}

fn default_overdue_threshold_secs() -> u64 {
    10
}

fn default_watchdog_interval_secs() -> u64 {
    15
}

fn default_max_retries() -> i32 {
    3
}

fn default_stranded_grace_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_watchdog_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_worker_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8001))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("WORKER_COUNT must be at least 1".into()));
        }
        if self.max_retries < 0 {
            return Err(ConfigError::Invalid("MAX_RETRIES must not be negative".into()));
        }
        if self.heartbeat_interval_secs == 0
            || self.heartbeat_interval_secs >= self.overdue_threshold_secs
        {
            return Err(ConfigError::Invalid(
                "HEARTBEAT_INTERVAL_SECS must be positive and below OVERDUE_THRESHOLD_SECS".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn overdue_threshold(&self) -> Duration {
        Duration::from_secs(self.overdue_threshold_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn stranded_grace(&self) -> Duration {
        Duration::from_secs(self.stranded_grace_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
