//! Dead-letter record types.
//!
//! Contains the data structures for representing entries that exhausted
//! their retries and for aggregating store statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entry::LogEntry;

/// Failure reason recorded when a flush exhausts its attempts.
pub const REASON_MAX_RETRIES: &str = "max retries exceeded";

/// Failure reason for entries that can never be persisted.
///
/// The worker filters invalid entries before they reach the store, so this
/// reason only appears on records written by other tools or older versions.
/// Retry sweeps never replay such records.
pub const REASON_INVALID_ENTRY: &str = "invalid entry";

/// A log entry that could not be persisted, one line in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// When this record was first written.
    pub timestamp: DateTime<Utc>,
    /// When the most recent persistence attempt failed.
    pub failure_time: DateTime<Utc>,
    /// Retry sweeps this entry has already failed.
    pub retry_count: u32,
    /// Error from the most recent attempt.
    pub last_error: String,
    /// The entry as it was submitted.
    pub original_entry: LogEntry,
    /// Why the entry was dead-lettered.
    pub failure_reason: String,
}

impl DeadLetterEntry {
    pub fn new(original_entry: LogEntry, reason: &str, last_error: &str) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now,
            failure_time: now,
            retry_count: 0,
            last_error: last_error.to_string(),
            original_entry,
            failure_reason: reason.to_string(),
        }
    }

    /// Record another failed replay.
    pub fn record_retry_failure(&mut self, error: &str) {
        self.retry_count += 1;
        self.last_error = error.to_string();
        self.failure_time = Utc::now();
    }
}

/// Operational snapshot of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterStats {
    /// Parsed entries across all files.
    pub total_entries: usize,
    /// Active file plus rotated backups that exist on disk.
    pub file_count: usize,
    /// Combined size of those files.
    pub total_size_bytes: u64,
    /// Number of entries per retry count.
    pub retry_histogram: BTreeMap<u32, usize>,
}

/// Outcome of a retry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweepReport {
    /// Entries persisted and removed from the store.
    pub succeeded: usize,
    /// Entries that failed again and were kept with a bumped retry count.
    pub failed: usize,
    /// Entries over the retry limit, kept untouched.
    pub skipped: usize,
}

impl RetrySweepReport {
    /// Entries still in the store after the sweep.
    pub fn remaining(&self) -> usize {
        self.failed + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogLevel;

    #[test]
    fn test_dead_letter_entry_serialization() {
        let entry = DeadLetterEntry::new(
            LogEntry::new(LogLevel::Error, "ERROR: disk full"),
            REASON_MAX_RETRIES,
            "connection refused",
        );

        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        for field in [
            "timestamp",
            "failure_time",
            "retry_count",
            "last_error",
            "original_entry",
            "failure_reason",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["original_entry"]["message"], "ERROR: disk full");
        assert_eq!(json["failure_reason"], "max retries exceeded");
    }

    #[test]
    fn test_dead_letter_entry_deserialization() {
        let json = r#"{"timestamp":"2026-01-26T10:30:00Z","failure_time":"2026-01-26T10:31:00Z","retry_count":2,"last_error":"timeout","original_entry":{"timestamp":"2026-01-26T10:29:59Z","level":"ERROR","message":"grade export failed"},"failure_reason":"max retries exceeded"}"#;
        let entry: DeadLetterEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.original_entry.level, LogLevel::Error);
        assert_eq!(entry.original_entry.message, "grade export failed");
    }

    #[test]
    fn test_record_retry_failure() {
        let mut entry = DeadLetterEntry::new(
            LogEntry::new(LogLevel::Info, "x"),
            REASON_MAX_RETRIES,
            "first",
        );
        let first_failure = entry.failure_time;

        entry.record_retry_failure("second");

        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.last_error, "second");
        assert!(entry.failure_time >= first_failure);
    }
}
