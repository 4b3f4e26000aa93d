//! The worker loop.
//!
//! Pulls entries off the queue into a batch and hands the batch to the
//! flusher when it is full or when the flush interval ticks. On shutdown the
//! queue is closed and everything still buffered is flushed before the task
//! returns.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::entry::LogEntry;
use crate::metrics::events::QueueDepth;

use super::flusher::BatchFlusher;
use super::health::WorkerState;

pub(super) struct Consumer {
    pub rx: mpsc::Receiver<LogEntry>,
    pub flusher: Arc<BatchFlusher>,
    pub state: Arc<WorkerState>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub shutdown: CancellationToken,
}

impl Consumer {
    pub async fn run(mut self) {
        info!(
            batch_size = self.batch_size,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Audit worker started"
        );

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Shutdown requested, draining audit queue");
                    break;
                }

                _ = ticker.tick() => {
                    emit!(QueueDepth { count: self.rx.len() });
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }

                received = self.rx.recv() => match received {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => {
                        debug!("Audit queue closed");
                        break;
                    }
                },
            }
        }

        self.drain(batch).await;
        self.state.set_running(false);
        info!("Audit worker stopped");
    }

    /// Flush whatever is queued without running the loop.
    pub async fn drain_queue(mut self) {
        self.drain(Vec::new()).await;
    }

    async fn flush(&self, batch: &mut Vec<LogEntry>) {
        let full = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        self.flusher.flush(full).await;
    }

    async fn drain(&mut self, batch: Vec<LogEntry>) {
        self.rx.close();

        let mut drained = batch.len();
        if !batch.is_empty() {
            self.flusher.flush(batch).await;
        }

        loop {
            let mut chunk = Vec::with_capacity(self.batch_size);
            while chunk.len() < self.batch_size {
                match self.rx.try_recv() {
                    Ok(entry) => chunk.push(entry),
                    Err(_) => break,
                }
            }
            if chunk.is_empty() {
                break;
            }
            drained += chunk.len();
            self.flusher.flush(chunk).await;
        }

        emit!(QueueDepth { count: 0 });
        if drained > 0 {
            info!("Flushed {} buffered entries on shutdown", drained);
        }
    }
}
