//! Shared worker counters and the health snapshot built from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::emit;
use crate::metrics::events::{DropReason, EntryDropped};

use super::governor::FailureGovernor;

const NEVER: i64 = i64::MIN;

/// Counters shared between producers, the worker loop and health readers.
///
/// Every field is atomic: reads never block and never fail.
#[derive(Debug)]
pub struct WorkerState {
    running: AtomicBool,
    total_processed: AtomicU64,
    total_dropped: AtomicU64,
    /// Unix milliseconds of the last successful flush.
    last_flush_ms: AtomicI64,
    governor: FailureGovernor,
}

impl WorkerState {
    pub fn new(governor: FailureGovernor) -> Self {
        Self {
            running: AtomicBool::new(false),
            total_processed: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            last_flush_ms: AtomicI64::new(NEVER),
            governor,
        }
    }

    pub fn governor(&self) -> &FailureGovernor {
        &self.governor
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        match self.last_flush_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub(crate) fn record_drop(&self, reason: DropReason) {
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
        emit!(EntryDropped { reason });
    }

    /// A flush persisted `entries` entries.
    pub(crate) fn record_flush_success(&self, entries: u64) {
        self.total_processed.fetch_add(entries, Ordering::Relaxed);
        self.last_flush_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        self.governor.record_success();
    }

    /// A retry sweep persisted `entries` dead letters.
    pub(crate) fn record_replayed(&self, entries: u64) {
        if entries == 0 {
            return;
        }
        self.total_processed.fetch_add(entries, Ordering::Relaxed);
        self.governor.record_success();
    }
}

/// Point-in-time view of the pipeline for health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub enabled: bool,
    pub worker_running: bool,
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub last_flush: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub max_failures: u32,
    /// New entries are currently being dropped by the governor.
    pub shedding: bool,
    pub total_processed: u64,
    pub total_dropped: u64,
    pub is_healthy: bool,
}

impl HealthStatus {
    pub(crate) fn capture(
        enabled: bool,
        state: &WorkerState,
        queue_length: usize,
        queue_capacity: usize,
    ) -> Self {
        let worker_running = state.is_running();
        let consecutive_failures = state.governor.consecutive_failures();
        let max_failures = state.governor.max_failures();

        Self {
            enabled,
            worker_running,
            queue_length,
            queue_capacity,
            last_flush: state.last_flush(),
            consecutive_failures,
            max_failures,
            shedding: state.governor.should_shed(),
            total_processed: state.total_processed(),
            total_dropped: state.total_dropped(),
            is_healthy: enabled && worker_running && consecutive_failures < max_failures,
        }
    }
}
