use crate::counter::RequestCounter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One interval reading of the shared request counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReading {
    /// 1 for the first reading; 0 means nothing has been read yet
    pub sequence: u64,
    /// Successful requests since the previous reading
    pub delta: u64,
    /// Counter value at the time of the reading
    pub total: u64,
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    /// Regular interval readings, not counting the final one
    pub intervals: u64,
    pub total_sent: u64,
    pub final_delta: u64,
}

/// Periodic reader of the request counter. Runs on its own timer and emits
/// exactly one final reading when stopped.
pub struct StatsAggregator {
    counter: RequestCounter,
    interval: Duration,
    last_reported: u64,
    sequence: u64,
    readings_tx: watch::Sender<StatsReading>,
}

impl StatsAggregator {
    pub fn new(counter: RequestCounter, interval: Duration) -> Self {
        let (readings_tx, _) = watch::channel(StatsReading::default());
        Self {
            counter,
            interval,
            last_reported: 0,
            sequence: 0,
            readings_tx,
        }
    }

    /// Latest reading, updated every interval and once more on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<StatsReading> {
        self.readings_tx.subscribe()
    }

    /// Read the counter and advance the baseline.
    pub fn take_reading(&mut self, is_final: bool) -> StatsReading {
        let total = self.counter.get();
        let delta = total.saturating_sub(self.last_reported);
        self.last_reported = total;
        self.sequence += 1;

        let reading = StatsReading {
            sequence: self.sequence,
            delta,
            total,
            is_final,
        };
        self.readings_tx.send_replace(reading);
        reading
    }

    pub async fn run(mut self, stop: CancellationToken) -> StatsSummary {
        let interval_secs = self.interval.as_secs_f64();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut intervals = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let reading = self.take_reading(false);
                    intervals += 1;
                    info!(
                        "Connections sent in last {} seconds: {}",
                        interval_secs, reading.delta
                    );
                }
            }
        }

        let reading = self.take_reading(true);
        info!(
            "Final connections sent in last {} seconds: {}",
            interval_secs, reading.delta
        );

        StatsSummary {
            intervals,
            total_sent: reading.total,
            final_delta: reading.delta,
        }
    }
}
