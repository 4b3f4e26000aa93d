//! Stdout sink for local development.

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::io::AsyncWriteExt;

use crate::entry::LogEntry;
use crate::error::{EntrySerializeSnafu, SinkError, StdoutWriteSnafu};

use super::{LogSink, encode_ndjson};

/// Writes each batch to stdout as JSON Lines.
pub struct StdoutSink;

#[async_trait]
impl LogSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn persist(&self, batch: &[LogEntry]) -> Result<(), SinkError> {
        let payload = encode_ndjson(batch).context(EntrySerializeSnafu)?;
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(payload.as_bytes())
            .await
            .context(StdoutWriteSnafu)?;
        stdout.flush().await.context(StdoutWriteSnafu)
    }
}
