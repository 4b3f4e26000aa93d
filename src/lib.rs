//! eduaudit: a background audit logging pipeline.
//!
//! Request handlers submit [`LogEntry`] values without blocking. A worker
//! task batches them, persists each batch through a [`LogSink`] with
//! exponential-backoff retry, sheds load after repeated failures and writes
//! batches that could not be persisted to a rotating dead-letter store.
//!
//! # Example
//!
//! ```ignore
//! use eduaudit::{AuditWorker, Config, DeadLetterStore, LogEntry, LogLevel, sink};
//! use std::sync::Arc;
//!
//! let config = Config::from_file("eduaudit.yaml")?;
//! let store = Arc::new(DeadLetterStore::from_config(&config.dead_letter));
//! let worker = AuditWorker::new(config.worker, sink::from_config(&config.sink), store);
//!
//! worker.start();
//! worker.submit(LogEntry::new(LogLevel::Info, "grade exported"));
//! worker.stop().await;
//! ```

pub mod config;
pub mod dlq;
pub mod entry;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod sink;
pub mod worker;

// Re-export main types
pub use config::Config;
pub use dlq::{DeadLetterEntry, DeadLetterStats, DeadLetterStore, RetrySweepReport};
pub use entry::{LogEntry, LogLevel};
pub use sink::{LogSink, LogSinkRef};
pub use worker::{AuditWorker, HealthStatus};
