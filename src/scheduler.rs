//! Fixed-period cycle scheduling with single-flight execution.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cycle::{CycleExecutor, CycleResult};
use crate::sink::MessageSink;
use crate::source::TagSource;

/// Drives the cycle executor on a fixed period.
///
/// Cycles are serialized by construction: the loop below awaits each cycle
/// to completion before asking the interval for another tick, so a cycle
/// that outlives the period defers the next one instead of overlapping it.
/// Neither endpoint session is safe for two concurrent cycles, so this is a
/// correctness property, not a tuning choice.
pub struct BridgeScheduler {
    period: Duration,
    executor: CycleExecutor,
}

impl BridgeScheduler {
    pub fn new(period: Duration, executor: CycleExecutor) -> Self {
        Self { period, executor }
    }

    pub fn executor(&self) -> &CycleExecutor {
        &self.executor
    }

    /// Run cycles until `stop` signals.
    ///
    /// The first cycle fires immediately. The stop signal is checked with
    /// priority before each tick, so no new cycle starts once shutdown has
    /// begun; an in-flight cycle always runs to completion before this
    /// returns.
    pub async fn run<S, K>(&self, source: &mut S, sink: &K, mut stop: watch::Receiver<bool>)
    where
        S: TagSource,
        K: MessageSink,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            period_secs = self.period.as_secs_f64(),
            mappings = self.executor.table().len(),
            "Scheduler running"
        );

        loop {
            tokio::select! {
                biased;

                _ = stop.changed() => break,

                _ = interval.tick() => {
                    let result = self.run_cycle(source, sink).await;
                    log_cycle(&result);
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// One complete read-all-then-publish-all pass.
    async fn run_cycle<S, K>(&self, source: &mut S, sink: &K) -> CycleResult
    where
        S: TagSource,
        K: MessageSink,
    {
        let captured_at = Utc::now();
        let snapshot = source.read_all().await;
        self.executor.execute(sink, &snapshot, captured_at).await
    }
}

fn log_cycle(result: &CycleResult) {
    if result.failed > 0 {
        warn!(
            published = result.published,
            skipped = result.skipped,
            failed = result.failed,
            "Cycle finished with failures"
        );
    } else {
        info!(
            published = result.published,
            skipped = result.skipped,
            failed = result.failed,
            "Cycle complete"
        );
    }
}
