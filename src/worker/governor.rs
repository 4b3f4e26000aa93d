//! Consecutive-failure governor.
//!
//! Counts flushes that exhausted every attempt. Once the count reaches the
//! configured threshold, new entries are shed instead of queued.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::emit;
use crate::metrics::events::ConsecutiveFailures;

const NO_FAILURE: u64 = u64::MAX;

/// Tracks consecutive flush failures and decides when to shed.
///
/// With a cool-down configured, shedding lifts once that long has passed
/// since the most recent failed flush; the next flush then either resets the
/// counter or restarts the cool-down.
#[derive(Debug)]
pub struct FailureGovernor {
    max_failures: u32,
    cooldown: Option<Duration>,
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` of the last failed flush.
    last_failure_ms: AtomicU64,
    epoch: Instant,
}

impl FailureGovernor {
    pub fn new(max_failures: u32, cooldown: Option<Duration>) -> Self {
        Self {
            max_failures,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(NO_FAILURE),
            epoch: Instant::now(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_failures, config.shed_cooldown())
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// True once the failure count has reached the threshold.
    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures() >= self.max_failures
    }

    /// Whether new entries should be dropped right now.
    pub fn should_shed(&self) -> bool {
        if !self.is_tripped() {
            return false;
        }
        let Some(cooldown) = self.cooldown else {
            return true;
        };
        let last = self.last_failure_ms.load(Ordering::Acquire);
        if last == NO_FAILURE {
            return true;
        }
        self.now_ms().saturating_sub(last) < cooldown.as_millis() as u64
    }

    /// A flush persisted its batch.
    pub fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous >= self.max_failures {
            info!(
                "Flush succeeded after {} consecutive failures, accepting entries again",
                previous
            );
        }
        if previous > 0 {
            emit!(ConsecutiveFailures { count: 0 });
        }
    }

    /// A flush exhausted its retries. Returns the new failure count.
    pub fn record_failure(&self) -> u32 {
        self.last_failure_ms.store(self.now_ms(), Ordering::Release);
        let count = self
            .consecutive_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        if count == self.max_failures {
            warn!(
                "{} consecutive flush failures, shedding new entries",
                count
            );
        }
        emit!(ConsecutiveFailures { count });
        count
    }

    /// Operator override: clear the failure count.
    pub fn reset(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        self.last_failure_ms.store(NO_FAILURE, Ordering::Release);
        info!("Failure counter reset (was {})", previous);
        emit!(ConsecutiveFailures { count: 0 });
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sheds_at_threshold() {
        let governor = FailureGovernor::new(3, None);

        governor.record_failure();
        governor.record_failure();
        assert!(!governor.should_shed());

        assert_eq!(governor.record_failure(), 3);
        assert!(governor.is_tripped());
        assert!(governor.should_shed());
    }

    #[test]
    fn test_success_resets_counter() {
        let governor = FailureGovernor::new(2, None);
        governor.record_failure();
        governor.record_failure();
        assert!(governor.should_shed());

        governor.record_success();

        assert_eq!(governor.consecutive_failures(), 0);
        assert!(!governor.should_shed());
    }

    #[test]
    fn test_reset_lifts_shedding() {
        let governor = FailureGovernor::new(1, None);
        governor.record_failure();
        assert!(governor.should_shed());

        governor.reset();

        assert!(!governor.should_shed());
        assert!(!governor.is_tripped());
    }

    #[test]
    fn test_cooldown_lifts_shedding_but_stays_tripped() {
        let governor = FailureGovernor::new(1, Some(Duration::from_millis(30)));
        governor.record_failure();
        assert!(governor.should_shed());

        std::thread::sleep(Duration::from_millis(60));

        assert!(!governor.should_shed());
        assert!(governor.is_tripped(), "only a success or reset clears the count");

        governor.record_failure();
        assert!(governor.should_shed(), "a new failure restarts the cool-down");
    }
}
