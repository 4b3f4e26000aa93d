//! Persistence port for flushed batches.
//!
//! The worker only knows [`LogSink`]; whether a batch lands in a SQL table,
//! an HTTP endpoint or a local file is up to the implementation. Any error
//! is treated as retryable.

mod file;
mod stdout;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SinkConfig;
use crate::entry::LogEntry;
use crate::error::SinkError;

pub use file::NdjsonFileSink;
pub use stdout::StdoutSink;

/// Trait for destinations that persist batches of log entries.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Persist the whole batch, or fail.
    ///
    /// A failed call may be repeated with the same batch.
    async fn persist(&self, batch: &[LogEntry]) -> Result<(), SinkError>;
}

/// Shared reference to a sink.
pub type LogSinkRef = Arc<dyn LogSink>;

/// Build the sink described by configuration.
pub fn from_config(config: &SinkConfig) -> LogSinkRef {
    match config {
        SinkConfig::File { path } => Arc::new(NdjsonFileSink::new(path.clone())),
        SinkConfig::Stdout => Arc::new(StdoutSink),
    }
}

/// Encode a batch as JSON Lines.
pub(crate) fn encode_ndjson(batch: &[LogEntry]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for entry in batch {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    Ok(out)
}
