//! Background audit worker.
//!
//! Producers call [`AuditWorker::submit`], which never blocks and never
//! fails: entries go onto a bounded queue or are dropped and counted. A
//! single task drains the queue in batches and persists them through a
//! [`LogSink`](crate::sink::LogSink), retrying with exponential backoff and
//! dead-lettering batches that exhaust their attempts.
//!
//! # Components
//!
//! - [`AuditWorker`] - Queue, lifecycle and operator controls
//! - [`BatchFlusher`] - Retry loop around a single batch
//! - [`FailureGovernor`] - Consecutive-failure tracking and load shedding
//! - [`HealthStatus`] - Snapshot for health checks

mod consumer;
mod flusher;
mod governor;
mod health;

pub use flusher::{BatchFlusher, FlushOutcome};
pub use governor::FailureGovernor;
pub use health::{HealthStatus, WorkerState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::dlq::{DeadLetterStats, DeadLetterStore, RetrySweepReport};
use crate::emit;
use crate::entry::LogEntry;
use crate::error::DeadLetterError;
use crate::metrics::events::{DropReason, EntrySubmitted};
use crate::sink::LogSinkRef;

use consumer::Consumer;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Owns the audit queue and the task that drains it.
pub struct AuditWorker {
    config: WorkerConfig,
    sink: LogSinkRef,
    dead_letters: Arc<DeadLetterStore>,
    state: Arc<WorkerState>,
    flusher: Arc<BatchFlusher>,
    sender: mpsc::Sender<LogEntry>,
    receiver: Mutex<Option<mpsc::Receiver<LogEntry>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    sweep_retry_limit: u32,
}

impl AuditWorker {
    /// Build a worker. Nothing runs until [`start`](Self::start).
    ///
    /// `config` is expected to have passed validation; a zero batch size or
    /// channel capacity is raised to one, a zero flush interval to one
    /// millisecond.
    pub fn new(config: WorkerConfig, sink: LogSinkRef, dead_letters: Arc<DeadLetterStore>) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let state = Arc::new(WorkerState::new(FailureGovernor::from_config(&config)));
        let flusher = Arc::new(BatchFlusher::new(
            sink.clone(),
            dead_letters.clone(),
            state.clone(),
            config.max_retries,
            config.retry_base_backoff(),
        ));

        Self {
            sweep_retry_limit: config.max_retries,
            config,
            sink,
            dead_letters,
            state,
            flusher,
            sender,
            receiver: Mutex::new(Some(receiver)),
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Dead letters retried more than `limit` times are skipped by sweeps.
    pub fn with_sweep_retry_limit(mut self, limit: u32) -> Self {
        self.sweep_retry_limit = limit;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }

    /// Token cancelled when the worker is stopped.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Queue an entry for persistence.
    ///
    /// Returns immediately. Invalid entries are discarded. While the governor
    /// is shedding, or when the queue is full or closed, the entry is dropped
    /// and counted.
    pub fn submit(&self, entry: LogEntry) {
        if !self.config.enabled {
            return;
        }
        if !entry.is_valid() {
            debug!("Discarding audit entry with empty message");
            return;
        }
        if self.state.governor().should_shed() {
            self.state.record_drop(DropReason::Shedding);
            return;
        }

        match self.sender.try_send(entry) {
            Ok(()) => emit!(EntrySubmitted),
            Err(TrySendError::Full(_)) => {
                self.state.record_drop(DropReason::QueueFull);
                warn!(
                    capacity = self.sender.max_capacity(),
                    "Audit queue full, dropping entry"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.state.record_drop(DropReason::Closed);
                warn!("Audit worker stopped, dropping entry");
            }
        }
    }

    /// Spawn the worker task. Returns `false` when disabled or already started.
    ///
    /// Must be called from within a Tokio runtime. If the task dies from a
    /// panic the worker reports itself as not running.
    pub fn start(&self) -> bool {
        if !self.config.enabled {
            info!("Audit worker disabled, not starting");
            return false;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Audit worker already started");
            return false;
        }
        let Some(rx) = lock(&self.receiver).take() else {
            return false;
        };

        self.state.set_running(true);
        let state = self.state.clone();
        let task = tokio::spawn(self.consumer(rx).run());
        *lock(&self.handle) = Some(tokio::spawn(async move {
            if let Err(e) = task.await {
                state.set_running(false);
                error!("Audit worker task failed: {}", e);
            }
        }));
        true
    }

    /// Stop the worker, flushing everything already queued.
    ///
    /// Safe to call more than once or without a prior `start`; entries
    /// queued before a `start` that never came are flushed here. Entries
    /// submitted afterwards are dropped.
    pub async fn stop(&self) {
        let was_started = self.started.swap(true, Ordering::AcqRel);
        self.shutdown.cancel();

        if !was_started {
            // Never ran: flush what was queued and close the queue so later
            // submits are counted as drops.
            let rx = lock(&self.receiver).take();
            if let Some(rx) = rx {
                self.consumer(rx).drain_queue().await;
            }
            return;
        }

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Audit worker supervisor failed: {}", e);
        }
        self.state.set_running(false);
    }

    fn consumer(&self, rx: mpsc::Receiver<LogEntry>) -> Consumer {
        Consumer {
            rx,
            flusher: self.flusher.clone(),
            state: self.state.clone(),
            batch_size: self.config.batch_size.max(1),
            flush_interval: self.config.flush_interval().max(MIN_FLUSH_INTERVAL),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        let capacity = self.sender.max_capacity();
        let queue_length = capacity.saturating_sub(self.sender.capacity());
        HealthStatus::capture(self.config.enabled, &self.state, queue_length, capacity)
    }

    pub async fn dead_letter_stats(&self) -> Result<DeadLetterStats, DeadLetterError> {
        self.dead_letters.stats().await
    }

    /// Replay dead letters through the sink using the configured limit.
    pub async fn trigger_retry_sweep(&self) -> Result<RetrySweepReport, DeadLetterError> {
        self.retry_dead_letters(self.sweep_retry_limit).await
    }

    /// Replay dead letters retried at most `max_retries` times.
    ///
    /// Replayed entries count as processed. Any success clears the failure
    /// counter.
    pub async fn retry_dead_letters(
        &self,
        max_retries: u32,
    ) -> Result<RetrySweepReport, DeadLetterError> {
        let report = self
            .dead_letters
            .retry_failed(self.sink.as_ref(), max_retries)
            .await?;
        self.state.record_replayed(report.succeeded as u64);
        Ok(report)
    }

    /// Clear the consecutive-failure counter, lifting any shedding.
    pub fn reset_failures(&self) {
        self.state.governor().reset();
    }

    /// Run a retry sweep every `period` until the worker is stopped.
    pub fn spawn_retry_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = worker.shutdown.cancelled() => break,
                    _ = ticker.tick() => match worker.trigger_retry_sweep().await {
                        Ok(report) if report.succeeded + report.failed > 0 => info!(
                            succeeded = report.succeeded,
                            failed = report.failed,
                            skipped = report.skipped,
                            "Dead-letter retry sweep completed"
                        ),
                        Ok(_) => debug!("Dead-letter retry sweep found nothing to replay"),
                        Err(e) => warn!("Dead-letter retry sweep failed: {}", e),
                    },
                }
            }
            debug!("Dead-letter retry sweeper stopped");
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
