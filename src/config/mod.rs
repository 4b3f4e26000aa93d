//! Configuration parsing.
//!
//! Handles loading configuration from a YAML file with environment variable
//! expansion. All values are immutable after load; the worker never reloads
//! them mid-run.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyDeadLetterPathSnafu, EmptySinkPathSnafu, EnvInterpolationSnafu,
    ReadFileSnafu, YamlParseSnafu, ZeroBatchSizeSnafu, ZeroChannelCapacitySnafu,
    ZeroDeadLetterFileSizeSnafu, ZeroFlushIntervalSnafu, ZeroMaxFailuresSnafu,
    ZeroMaxRetriesSnafu,
};

/// Byte size constants (binary/IEC units).
pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue, batching, retry and shedding settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// On-disk store for entries that exhausted their retries.
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
    /// Where batches are persisted.
    #[serde(default)]
    pub sink: SinkConfig,
    /// Prometheus and admin endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Worker settings injected at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// When false, `submit` is a silent no-op (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Entries per flush (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Bounded queue capacity (default: 10000).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Flush a partial batch after this long (default: 5000ms).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Persistence attempts per flush (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Consecutive failed flushes before new entries are shed (default: 5).
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// First backoff step; doubles on each further attempt (default: 100ms).
    #[serde(default = "default_retry_base_backoff_ms")]
    pub retry_base_backoff_ms: u64,
    /// Shedding lifts this long after the last failed flush.
    /// `null` disables the cool-down (default: 30s).
    #[serde(default = "default_shed_cooldown_secs")]
    pub shed_cooldown_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retries: default_max_retries(),
            max_failures: default_max_failures(),
            retry_base_backoff_ms: default_retry_base_backoff_ms(),
            shed_cooldown_secs: default_shed_cooldown_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_base_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_base_backoff_ms)
    }

    pub fn shed_cooldown(&self) -> Option<Duration> {
        self.shed_cooldown_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.batch_size > 0, ZeroBatchSizeSnafu);
        ensure!(self.channel_capacity > 0, ZeroChannelCapacitySnafu);
        ensure!(self.flush_interval_ms > 0, ZeroFlushIntervalSnafu);
        ensure!(self.max_retries > 0, ZeroMaxRetriesSnafu);
        ensure!(self.max_failures > 0, ZeroMaxFailuresSnafu);
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_failures() -> u32 {
    5
}

fn default_retry_base_backoff_ms() -> u64 {
    100
}

fn default_shed_cooldown_secs() -> Option<u64> {
    Some(30)
}

/// Dead-letter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Active file; rotated backups get `.1`, `.2`, ... suffixes.
    #[serde(default = "default_dead_letter_path")]
    pub path: PathBuf,
    /// Rotate once the active file reaches this size (default: 10MB).
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    /// Number of rotated backups to keep (default: 5).
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Entries retried more often than this are left for manual inspection
    /// by the retry sweep (default: 3).
    #[serde(default = "default_retry_max_count")]
    pub retry_max_count: u32,
    /// Run the retry sweep on this interval (optional, off by default).
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            path: default_dead_letter_path(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_files: default_max_files(),
            retry_max_count: default_retry_max_count(),
            retry_interval_secs: None,
        }
    }
}

impl DeadLetterConfig {
    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_dead_letter_path() -> PathBuf {
    PathBuf::from("logs/dead_letter.jsonl")
}

fn default_max_file_size_bytes() -> u64 {
    10 * MB
}

fn default_max_files() -> usize {
    5
}

fn default_retry_max_count() -> u32 {
    3
}

/// Persistence target for flushed batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Append JSON Lines to a local file.
    File { path: PathBuf },
    /// Write JSON Lines to stdout.
    Stdout,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::File {
            path: PathBuf::from("logs/audit.jsonl"),
        }
    }
}

/// Metrics configuration for the Prometheus and admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the endpoint is started (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` placeholders.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let content =
            vars::expand(content).map_err(|message| EnvInterpolationSnafu { message }.build())?;
        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker.validate()?;
        ensure!(
            !self.dead_letter.path.as_os_str().is_empty(),
            EmptyDeadLetterPathSnafu
        );
        ensure!(
            self.dead_letter.max_file_size_bytes > 0,
            ZeroDeadLetterFileSizeSnafu
        );
        if let SinkConfig::File { path } = &self.sink {
            ensure!(!path.as_os_str().is_empty(), EmptySinkPathSnafu);
        }
        Ok(())
    }
}
