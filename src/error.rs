//! Error types for eduaudit using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. Nothing here ever reaches the
//! caller of `AuditWorker::submit`; these errors surface only on operator
//! paths (config loading, dead-letter inspection, the binary).

use snafu::prelude::*;
use std::path::PathBuf;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Batch size must allow at least one entry.
    #[snafu(display("worker.batch_size must be greater than zero"))]
    ZeroBatchSize,

    /// A bounded channel needs room for at least one entry.
    #[snafu(display("worker.channel_capacity must be greater than zero"))]
    ZeroChannelCapacity,

    /// Flush interval of zero would spin the worker loop.
    #[snafu(display("worker.flush_interval_ms must be greater than zero"))]
    ZeroFlushInterval,

    /// At least one persistence attempt is required per flush.
    #[snafu(display("worker.max_retries must be greater than zero"))]
    ZeroMaxRetries,

    /// A threshold of zero would shed every entry.
    #[snafu(display("worker.max_failures must be greater than zero"))]
    ZeroMaxFailures,

    /// Dead-letter path is empty.
    #[snafu(display("dead_letter.path cannot be empty"))]
    EmptyDeadLetterPath,

    /// Dead-letter files need a non-zero size ceiling.
    #[snafu(display("dead_letter.max_file_size_bytes must be greater than zero"))]
    ZeroDeadLetterFileSize,

    /// File sink path is empty.
    #[snafu(display("sink.path cannot be empty"))]
    EmptySinkPath,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },
}

// ============ Sink Errors ============

/// Errors returned by a persistence port.
///
/// The worker treats every variant as retryable.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// IO error while writing a batch.
    #[snafu(display("Sink IO error on {}: {source}", path.display()))]
    SinkIo {
        source: std::io::Error,
        path: PathBuf,
    },

    /// IO error while writing to stdout.
    #[snafu(display("Stdout write failed: {source}"))]
    StdoutWrite { source: std::io::Error },

    /// Failed to serialize a log entry.
    #[snafu(display("Failed to serialize log entry: {source}"))]
    EntrySerialize { source: serde_json::Error },

    /// Downstream refused the batch.
    #[snafu(display("Batch rejected by {sink}: {message}"))]
    Rejected { sink: String, message: String },

    /// The sink panicked while persisting.
    #[snafu(display("Sink {sink} panicked: {message}"))]
    Panicked { sink: String, message: String },
}

// ============ Dead-letter Errors ============

/// Errors that can occur during dead-letter store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts with the other enums
#[allow(clippy::enum_variant_names)]
pub enum DeadLetterError {
    /// Failed to create the dead-letter directory.
    #[snafu(display("Failed to create dead-letter directory {}: {source}", path.display()))]
    DeadLetterCreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to append to a dead-letter file.
    #[snafu(display("Failed to write dead-letter file {}: {source}", path.display()))]
    DeadLetterWrite {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to read a dead-letter file.
    #[snafu(display("Failed to read dead-letter file {}: {source}", path.display()))]
    DeadLetterRead {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to remove a dead-letter file.
    #[snafu(display("Failed to remove dead-letter file {}: {source}", path.display()))]
    DeadLetterRemove {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to rename a file during rotation.
    #[snafu(display("Failed to rotate {} to {}: {source}", from.display(), to.display()))]
    DeadLetterRotate {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Failed to serialize a dead-letter record.
    #[snafu(display("Failed to serialize dead-letter record: {source}"))]
    DeadLetterSerialize { source: serde_json::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Failed to bind the admin server.
    #[snafu(display("Failed to bind admin server to {addr}: {source}"))]
    ServerBind {
        source: std::io::Error,
        addr: std::net::SocketAddr,
    },
}

// ============ App Error (top-level) ============

/// Top-level errors for the binary that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Dead-letter store error.
    #[snafu(display("Dead-letter store error"))]
    DeadLetter { source: DeadLetterError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// Worker is disabled in configuration but `run` was requested.
    #[snafu(display("Worker is disabled (worker.enabled = false)"))]
    WorkerDisabled,
}
