use crate::config::RateConfig;
use std::time::Duration;

/// Per-batch pacing: each batch gets `cycle_time * batch_size` of wall clock.
///
/// A fast batch sleeps off the remainder; a slow one is followed immediately
/// by the next batch. Overruns are not paid back in later cycles.
#[derive(Debug, Clone, Copy)]
pub struct BatchPacer {
    target_batch_time: Duration,
}

impl BatchPacer {
    pub fn new(rate: &RateConfig) -> Self {
        Self::with_cycle_time(rate.target_cycle_time(), rate.batch_size)
    }

    pub fn with_cycle_time(cycle_time: Duration, batch_size: u32) -> Self {
        Self {
            target_batch_time: cycle_time.saturating_mul(batch_size),
        }
    }

    pub fn target_batch_time(&self) -> Duration {
        self.target_batch_time
    }

    /// How long to wait after a batch that took `elapsed`.
    pub fn pause_after(&self, elapsed: Duration) -> Duration {
        self.target_batch_time.saturating_sub(elapsed)
    }
}
