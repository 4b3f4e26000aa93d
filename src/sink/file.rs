//! JSON Lines file sink.

use async_trait::async_trait;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::LogEntry;
use crate::error::{EntrySerializeSnafu, SinkError, SinkIoSnafu};

use super::{LogSink, encode_ndjson};

/// Appends each batch to a local file, one JSON object per line.
///
/// A batch is written with a single `write_all` so concurrent flushes from
/// separate workers never interleave lines.
pub struct NdjsonFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl NdjsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for NdjsonFileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn persist(&self, batch: &[LogEntry]) -> Result<(), SinkError> {
        let payload = encode_ndjson(batch).context(EntrySerializeSnafu)?;
        let path = self.path.as_path();

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context(SinkIoSnafu { path: parent })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context(SinkIoSnafu { path })?;
        file.write_all(payload.as_bytes())
            .await
            .context(SinkIoSnafu { path })?;
        file.flush().await.context(SinkIoSnafu { path })?;

        debug!("Persisted {} entries to {}", batch.len(), path.display());
        Ok(())
    }
}
