//! Disk-backed dead-letter store.
//!
//! Records entries that exhausted their retries as JSON Lines in an active
//! file. When the active file reaches its size ceiling it is rotated to
//! `<path>.1`, older backups shift up by one and the oldest is deleted.

use snafu::prelude::*;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DeadLetterConfig;
use crate::emit;
use crate::entry::LogEntry;
use crate::error::{
    DeadLetterCreateDirSnafu, DeadLetterError, DeadLetterReadSnafu, DeadLetterRemoveSnafu,
    DeadLetterRotateSnafu, DeadLetterSerializeSnafu, DeadLetterWriteSnafu,
};
use crate::metrics::events::{DeadLetterRotated, EntriesDeadLettered, RetrySweepCompleted};
use crate::sink::LogSink;

use super::types::{DeadLetterEntry, DeadLetterStats, REASON_INVALID_ENTRY, RetrySweepReport};

/// Entries handed to the sink per call during a retry sweep.
const DEFAULT_REPLAY_BATCH_SIZE: usize = 100;

/// Append-only, size-rotated store for dead-letter entries.
///
/// Every file operation runs under one async mutex, so concurrent writers
/// never interleave lines and a retry sweep's rewrite cannot lose entries
/// written while it runs.
pub struct DeadLetterStore {
    path: PathBuf,
    max_file_size: u64,
    max_files: usize,
    replay_batch_size: usize,
    lock: Mutex<()>,
}

impl DeadLetterStore {
    /// Create a store rooted at `path`.
    ///
    /// Nothing touches the disk until the first write.
    pub fn new(path: impl Into<PathBuf>, max_file_size: u64, max_files: usize) -> Self {
        Self {
            path: path.into(),
            max_file_size,
            max_files,
            replay_batch_size: DEFAULT_REPLAY_BATCH_SIZE,
            lock: Mutex::new(()),
        }
    }

    /// Replay at most `size` entries per sink call during sweeps.
    pub fn with_replay_batch_size(mut self, size: usize) -> Self {
        self.replay_batch_size = size.max(1);
        self
    }

    pub fn from_config(config: &DeadLetterConfig) -> Self {
        Self::new(
            config.path.clone(),
            config.max_file_size_bytes,
            config.max_files,
        )
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one entry that could not be persisted.
    pub async fn add_failed_entry(
        &self,
        entry: LogEntry,
        reason: &str,
        last_error: &str,
    ) -> Result<(), DeadLetterError> {
        self.add_failed_batch(vec![entry], reason, last_error)
            .await
            .map(|_| ())
    }

    /// Record every entry of a failed batch, one line each.
    ///
    /// Returns the number of records written.
    pub async fn add_failed_batch(
        &self,
        batch: Vec<LogEntry>,
        reason: &str,
        last_error: &str,
    ) -> Result<usize, DeadLetterError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let records: Vec<DeadLetterEntry> = batch
            .into_iter()
            .map(|entry| DeadLetterEntry::new(entry, reason, last_error))
            .collect();

        let _guard = self.lock.lock().await;
        self.append_records(&records).await?;

        let count = records.len();
        emit!(EntriesDeadLettered {
            count: count as u64
        });
        debug!(
            "Recorded {} dead-letter entries to {} ({})",
            count,
            self.path.display(),
            reason
        );
        Ok(count)
    }

    /// Read every entry from the rotated backups (oldest first) and the
    /// active file. Lines that fail to parse are logged and skipped.
    pub async fn read_entries(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    /// Replay dead letters through `sink`.
    ///
    /// Entries whose retry count already exceeds `max_retries`, and entries
    /// recorded as invalid, are kept as-is for manual inspection. The rest
    /// are persisted in chunks of the replay batch size; a successful chunk
    /// leaves the store, every entry of a failed chunk stays with a bumped
    /// retry count. The store is then rewritten with only the kept entries.
    pub async fn retry_failed(
        &self,
        sink: &dyn LogSink,
        max_retries: u32,
    ) -> Result<RetrySweepReport, DeadLetterError> {
        let _guard = self.lock.lock().await;

        let entries = self.read_unlocked().await?;
        let mut report = RetrySweepReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        info!(
            "Retrying {} dead-letter entries through {} sink",
            entries.len(),
            sink.name()
        );

        let (replayable, mut kept): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|entry| is_replayable(entry, max_retries));
        report.skipped = kept.len();

        for chunk in replayable.chunks(self.replay_batch_size) {
            let batch: Vec<LogEntry> = chunk
                .iter()
                .map(|entry| entry.original_entry.clone())
                .collect();
            match sink.persist(&batch).await {
                Ok(()) => report.succeeded += chunk.len(),
                Err(e) => {
                    let message = e.to_string();
                    report.failed += chunk.len();
                    kept.extend(chunk.iter().cloned().map(|mut entry| {
                        entry.record_retry_failure(&message);
                        entry
                    }));
                }
            }
        }

        if let Err(e) = self.rewrite(&kept).await {
            error!(
                "Failed to rewrite dead-letter store after retry sweep, previous files kept: {}",
                e
            );
        }

        emit!(RetrySweepCompleted {
            succeeded: report.succeeded as u64,
            failed: report.failed as u64,
            skipped: report.skipped as u64,
        });
        info!(
            "Retry sweep complete: {} succeeded, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );
        Ok(report)
    }

    /// Entry count, file count, combined size and retry-count histogram.
    pub async fn stats(&self) -> Result<DeadLetterStats, DeadLetterError> {
        let _guard = self.lock.lock().await;

        let mut stats = DeadLetterStats::default();
        for path in self.existing_files().await {
            match fs::metadata(&path).await {
                Ok(meta) => {
                    stats.file_count += 1;
                    stats.total_size_bytes += meta.len();
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).context(DeadLetterReadSnafu { path }),
            }
        }

        let entries = self.read_unlocked().await?;
        stats.total_entries = entries.len();
        let mut histogram = BTreeMap::new();
        for entry in &entries {
            *histogram.entry(entry.retry_count).or_insert(0) += 1;
        }
        stats.retry_histogram = histogram;
        Ok(stats)
    }

    /// Path of the `n`th rotated backup.
    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Existing files, oldest backup first and the active file last.
    async fn existing_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for n in (1..=self.max_files).rev() {
            let path = self.backup_path(n);
            if fs::try_exists(&path).await.unwrap_or(false) {
                files.push(path);
            }
        }
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            files.push(self.path.clone());
        }
        files
    }

    async fn read_unlocked(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let mut entries = Vec::new();
        for path in self.existing_files().await {
            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e).context(DeadLetterReadSnafu { path }),
            };

            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DeadLetterEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(
                        "Skipping corrupt dead-letter line {} in {}: {}",
                        index + 1,
                        path.display(),
                        e
                    ),
                }
            }
        }
        Ok(entries)
    }

    async fn ensure_parent_dir(&self) -> Result<(), DeadLetterError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context(DeadLetterCreateDirSnafu { path: parent })?;
        }
        Ok(())
    }

    async fn open_active(&self) -> Result<File, DeadLetterError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(DeadLetterWriteSnafu { path: &self.path })
    }

    /// Append records, rotating before any line that would land in a full
    /// active file. Caller holds the lock.
    async fn append_records(&self, records: &[DeadLetterEntry]) -> Result<(), DeadLetterError> {
        self.ensure_parent_dir().await?;

        let mut size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let mut rotation_failed = false;
        let mut file = self.open_active().await?;

        for record in records {
            let mut line = serde_json::to_string(record).context(DeadLetterSerializeSnafu)?;
            line.push('\n');

            if size >= self.max_file_size && !rotation_failed {
                file.flush()
                    .await
                    .context(DeadLetterWriteSnafu { path: &self.path })?;
                drop(file);

                match self.rotate().await {
                    Ok(()) => {
                        emit!(DeadLetterRotated);
                        size = 0;
                    }
                    Err(e) => {
                        warn!("Dead-letter rotation failed, appending anyway: {}", e);
                        rotation_failed = true;
                    }
                }
                file = self.open_active().await?;
            }

            file.write_all(line.as_bytes())
                .await
                .context(DeadLetterWriteSnafu { path: &self.path })?;
            size += line.len() as u64;
        }

        file.flush()
            .await
            .context(DeadLetterWriteSnafu { path: &self.path })
    }

    /// Shift backups up by one, dropping the oldest, and move the active
    /// file to `.1`. With `max_files == 0` the active file is discarded.
    async fn rotate(&self) -> Result<(), DeadLetterError> {
        if self.max_files == 0 {
            return remove_if_exists(&self.path).await;
        }

        remove_if_exists(&self.backup_path(self.max_files)).await?;
        for n in (1..self.max_files).rev() {
            let from = self.backup_path(n);
            if fs::try_exists(&from).await.unwrap_or(false) {
                let to = self.backup_path(n + 1);
                fs::rename(&from, &to)
                    .await
                    .context(DeadLetterRotateSnafu { from: &from, to })?;
            }
        }

        let to = self.backup_path(1);
        fs::rename(&self.path, &to).await.context(DeadLetterRotateSnafu {
            from: &self.path,
            to: &to,
        })?;
        debug!("Rotated dead-letter file {}", self.path.display());
        Ok(())
    }

    /// Replace every file with a single active file holding `entries`.
    ///
    /// The new content is staged in a temporary file first; old files are
    /// only removed once it is fully written.
    async fn rewrite(&self, entries: &[DeadLetterEntry]) -> Result<(), DeadLetterError> {
        let mut staged = self.path.as_os_str().to_os_string();
        staged.push(".rewrite");
        let staged = PathBuf::from(staged);

        let mut payload = String::new();
        for entry in entries {
            payload.push_str(&serde_json::to_string(entry).context(DeadLetterSerializeSnafu)?);
            payload.push('\n');
        }

        self.ensure_parent_dir().await?;
        fs::write(&staged, payload)
            .await
            .context(DeadLetterWriteSnafu { path: &staged })?;

        for path in self.existing_files().await {
            if let Err(e) = remove_if_exists(&path).await {
                warn!("{}", e);
            }
        }

        if entries.is_empty() {
            return remove_if_exists(&staged).await;
        }
        fs::rename(&staged, &self.path)
            .await
            .context(DeadLetterRotateSnafu {
                from: &staged,
                to: &self.path,
            })
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), DeadLetterError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(DeadLetterRemoveSnafu { path }),
    }
}

fn is_replayable(entry: &DeadLetterEntry, max_retries: u32) -> bool {
    entry.retry_count <= max_retries
        && entry.failure_reason != REASON_INVALID_ENTRY
        && entry.original_entry.is_valid()
}
