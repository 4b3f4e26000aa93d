//! Batch flushing with bounded retry.
//!
//! A batch is handed to the sink up to `max_retries` times, sleeping
//! `base * 2^attempt` between attempts. A batch that fails every attempt is
//! moved to the dead-letter store and counted against the failure governor.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::dlq::{DeadLetterStore, REASON_MAX_RETRIES};
use crate::emit;
use crate::entry::LogEntry;
use crate::error::{PanickedSnafu, SinkError};
use crate::metrics::events::{BatchFlushed, FlushFailed, FlushRetried};
use crate::sink::LogSinkRef;

use super::health::WorkerState;

/// What happened to a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing valid to persist.
    Empty,
    /// The sink accepted the batch.
    Persisted { entries: usize, attempts: u32 },
    /// Every attempt failed; the batch went to the dead-letter store.
    DeadLettered { entries: usize, last_error: String },
}

/// Persists batches for the worker loop.
pub struct BatchFlusher {
    sink: LogSinkRef,
    dead_letters: Arc<DeadLetterStore>,
    state: Arc<WorkerState>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl BatchFlusher {
    pub fn new(
        sink: LogSinkRef,
        dead_letters: Arc<DeadLetterStore>,
        state: Arc<WorkerState>,
        max_retries: u32,
        base_backoff: Duration,
    ) -> Self {
        Self {
            sink,
            dead_letters,
            state,
            max_attempts: max_retries.max(1),
            base_backoff,
        }
    }

    /// Delay before the attempt following zero-based `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }

    /// Persist one batch. Never fails: errors end in the dead-letter store.
    pub async fn flush(&self, batch: Vec<LogEntry>) -> FlushOutcome {
        let batch: Vec<LogEntry> = batch.into_iter().filter(LogEntry::is_valid).collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let entries = batch.len();
        let start = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            match self.persist(&batch).await {
                Ok(()) => {
                    self.state.record_flush_success(entries as u64);
                    emit!(BatchFlushed {
                        entries: entries as u64,
                        attempts: attempt + 1,
                        duration: start.elapsed(),
                    });
                    debug!(
                        "Flushed {} entries to {} (attempt {}/{})",
                        entries,
                        self.sink.name(),
                        attempt + 1,
                        self.max_attempts
                    );
                    return FlushOutcome::Persisted {
                        entries,
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < self.max_attempts {
                        let backoff = self.backoff_for(attempt);
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Flush attempt failed, retrying"
                        );
                        emit!(FlushRetried {
                            attempt: attempt + 1,
                            backoff,
                        });
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        let failures = self.state.governor().record_failure();
        error!(
            entries,
            attempts = self.max_attempts,
            consecutive_failures = failures,
            error = %last_error,
            "Flush failed after all retries, moving batch to dead-letter store"
        );
        emit!(FlushFailed {
            entries: entries as u64
        });

        if let Err(e) = self
            .dead_letters
            .add_failed_batch(batch, REASON_MAX_RETRIES, &last_error)
            .await
        {
            error!("Failed to dead-letter {} entries, they are lost: {}", entries, e);
        }

        FlushOutcome::DeadLettered {
            entries,
            last_error,
        }
    }

    /// A panicking sink counts as a failed attempt.
    async fn persist(&self, batch: &[LogEntry]) -> Result<(), SinkError> {
        match AssertUnwindSafe(self.sink.persist(batch)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => PanickedSnafu {
                sink: self.sink.name(),
                message: panic_message(payload.as_ref()),
            }
            .fail(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogLevel;
    use crate::sink::testing::ScriptedSink;
    use crate::worker::governor::FailureGovernor;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        sink: Arc<ScriptedSink>,
        store: Arc<DeadLetterStore>,
        state: Arc<WorkerState>,
        flusher: BatchFlusher,
    }

    fn fixture(sink: ScriptedSink, max_retries: u32, backoff_ms: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(sink);
        let store = Arc::new(DeadLetterStore::new(
            dir.path().join("dead_letter.jsonl"),
            1024 * 1024,
            3,
        ));
        let state = Arc::new(WorkerState::new(FailureGovernor::new(5, None)));
        let flusher = BatchFlusher::new(
            sink.clone(),
            store.clone(),
            state.clone(),
            max_retries,
            Duration::from_millis(backoff_ms),
        );
        Fixture {
            _dir: dir,
            sink,
            store,
            state,
            flusher,
        }
    }

    fn batch(n: usize) -> Vec<LogEntry> {
        (0..n)
            .map(|i| LogEntry::new(LogLevel::Info, format!("entry {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_flush_persists_on_first_attempt() {
        let f = fixture(ScriptedSink::succeeding(), 3, 10);

        let outcome = f.flusher.flush(batch(4)).await;

        assert_eq!(
            outcome,
            FlushOutcome::Persisted {
                entries: 4,
                attempts: 1
            }
        );
        assert_eq!(f.sink.persisted().len(), 4);
        assert_eq!(f.state.total_processed(), 4);
        assert!(f.state.last_flush().is_some());
    }

    #[tokio::test]
    async fn test_flush_recovers_after_transient_failure() {
        let f = fixture(ScriptedSink::flaky(2), 3, 5);

        let outcome = f.flusher.flush(batch(2)).await;

        assert_eq!(
            outcome,
            FlushOutcome::Persisted {
                entries: 2,
                attempts: 3
            }
        );
        assert_eq!(f.sink.calls(), 3);
        assert!(f.store.read_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_batch_is_dead_lettered() {
        let f = fixture(ScriptedSink::failing(), 3, 20);

        let outcome = f.flusher.flush(batch(3)).await;

        assert!(matches!(
            outcome,
            FlushOutcome::DeadLettered { entries: 3, .. }
        ));
        assert_eq!(f.sink.calls(), 3);
        assert_eq!(f.state.governor().consecutive_failures(), 1);
        assert_eq!(f.state.total_processed(), 0);

        let letters = f.store.read_entries().await.unwrap();
        assert_eq!(letters.len(), 3);
        assert!(
            letters
                .iter()
                .all(|l| l.failure_reason == REASON_MAX_RETRIES && l.retry_count == 0)
        );
        assert!(letters[0].last_error.contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_backoff_doubles_between_attempts() {
        let f = fixture(ScriptedSink::failing(), 3, 20);

        f.flusher.flush(batch(1)).await;

        let times = f.sink.call_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(20), "{first_gap:?}");
        assert!(second_gap >= Duration::from_millis(40), "{second_gap:?}");
        assert!(second_gap > first_gap);
    }

    #[tokio::test]
    async fn test_invalid_entries_never_reach_sink() {
        let f = fixture(ScriptedSink::succeeding(), 3, 10);
        let mut entries = batch(1);
        entries.push(LogEntry::new(LogLevel::Warn, ""));

        assert_eq!(
            f.flusher.flush(entries).await,
            FlushOutcome::Persisted {
                entries: 1,
                attempts: 1
            }
        );
        assert_eq!(
            f.flusher
                .flush(vec![LogEntry::new(LogLevel::Info, "")])
                .await,
            FlushOutcome::Empty
        );
        assert_eq!(f.sink.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_sink_counts_as_failed_attempt() {
        let f = fixture(ScriptedSink::panicking(1), 3, 5);

        let outcome = f.flusher.flush(batch(2)).await;

        assert_eq!(
            outcome,
            FlushOutcome::Persisted {
                entries: 2,
                attempts: 2
            }
        );
        assert_eq!(f.sink.calls(), 2);
    }

    #[tokio::test]
    async fn test_sink_that_always_panics_is_dead_lettered() {
        let f = fixture(ScriptedSink::panicking(usize::MAX), 2, 5);

        let outcome = f.flusher.flush(batch(1)).await;

        let FlushOutcome::DeadLettered { entries, last_error } = outcome else {
            panic!("expected a dead-lettered outcome");
        };
        assert_eq!(entries, 1);
        assert!(last_error.contains("scripted sink crashed"), "{last_error}");
        assert_eq!(f.state.governor().consecutive_failures(), 1);
        assert_eq!(f.store.read_entries().await.unwrap().len(), 1);
    }

    #[test]
    fn test_backoff_schedule() {
        let f = fixture(ScriptedSink::succeeding(), 3, 100);
        assert_eq!(f.flusher.backoff_for(0), Duration::from_millis(100));
        assert_eq!(f.flusher.backoff_for(1), Duration::from_millis(200));
        assert_eq!(f.flusher.backoff_for(2), Duration::from_millis(400));
        assert!(f.flusher.backoff_for(40) >= Duration::from_millis(100));
    }
}
