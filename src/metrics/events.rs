//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the audit
//! pipeline. Events implement the `InternalEvent` trait which emits the
//! corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when an entry is accepted onto the queue.
pub struct EntrySubmitted;

impl InternalEvent for EntrySubmitted {
    fn emit(self) {
        counter!("eduaudit_entries_submitted_total").increment(1);
    }
}

/// Why an entry was dropped instead of queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The failure governor is shedding load.
    Shedding,
    /// The bounded queue had no free slot.
    QueueFull,
    /// The worker was stopped and the queue closed.
    Closed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Shedding => "shedding",
            DropReason::QueueFull => "queue_full",
            DropReason::Closed => "closed",
        }
    }
}

/// Event emitted when an entry is dropped.
pub struct EntryDropped {
    pub reason: DropReason,
}

impl InternalEvent for EntryDropped {
    fn emit(self) {
        trace!(reason = self.reason.as_str(), "Entry dropped");
        counter!("eduaudit_entries_dropped_total", "reason" => self.reason.as_str()).increment(1);
    }
}

/// Event emitted when a batch is persisted.
pub struct BatchFlushed {
    pub entries: u64,
    pub attempts: u32,
    pub duration: Duration,
}

impl InternalEvent for BatchFlushed {
    fn emit(self) {
        trace!(
            entries = self.entries,
            attempts = self.attempts,
            duration_ms = self.duration.as_millis(),
            "Batch flushed"
        );
        counter!("eduaudit_batches_flushed_total").increment(1);
        counter!("eduaudit_entries_processed_total").increment(self.entries);
        histogram!("eduaudit_flush_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a persistence attempt fails and will be retried.
pub struct FlushRetried {
    pub attempt: u32,
    pub backoff: Duration,
}

impl InternalEvent for FlushRetried {
    fn emit(self) {
        trace!(
            attempt = self.attempt,
            backoff_ms = self.backoff.as_millis(),
            "Flush retried"
        );
        counter!("eduaudit_flush_retries_total").increment(1);
    }
}

/// Event emitted when a flush exhausts its retries.
pub struct FlushFailed {
    pub entries: u64,
}

impl InternalEvent for FlushFailed {
    fn emit(self) {
        trace!(entries = self.entries, "Flush failed");
        counter!("eduaudit_flush_failures_total").increment(1);
    }
}

/// Event emitted when entries are written to the dead-letter store.
pub struct EntriesDeadLettered {
    pub count: u64,
}

impl InternalEvent for EntriesDeadLettered {
    fn emit(self) {
        trace!(count = self.count, "Entries dead-lettered");
        counter!("eduaudit_dead_lettered_total").increment(self.count);
    }
}

/// Event emitted when the active dead-letter file is rotated.
pub struct DeadLetterRotated;

impl InternalEvent for DeadLetterRotated {
    fn emit(self) {
        trace!("Dead-letter file rotated");
        counter!("eduaudit_dead_letter_rotations_total").increment(1);
    }
}

/// Event emitted when a dead-letter retry sweep completes.
pub struct RetrySweepCompleted {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl InternalEvent for RetrySweepCompleted {
    fn emit(self) {
        trace!(
            succeeded = self.succeeded,
            failed = self.failed,
            skipped = self.skipped,
            "Retry sweep completed"
        );
        counter!("eduaudit_retry_sweep_entries_total", "result" => "succeeded")
            .increment(self.succeeded);
        counter!("eduaudit_retry_sweep_entries_total", "result" => "failed").increment(self.failed);
        counter!("eduaudit_retry_sweep_entries_total", "result" => "skipped")
            .increment(self.skipped);
    }
}

// ============================================================================
// Gauges
// ============================================================================

/// Event emitted when the queue depth is sampled.
pub struct QueueDepth {
    pub count: usize,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        trace!(count = self.count, "Queue depth");
        gauge!("eduaudit_queue_depth").set(self.count as f64);
    }
}

/// Event emitted when the consecutive-failure counter changes.
pub struct ConsecutiveFailures {
    pub count: u32,
}

impl InternalEvent for ConsecutiveFailures {
    fn emit(self) {
        trace!(count = self.count, "Consecutive flush failures");
        gauge!("eduaudit_consecutive_failures").set(f64::from(self.count));
    }
}
