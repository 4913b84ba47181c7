//! Periodic queue drain.
//!
//! Each tick asks the [`QueueProcessor`] for one batch of pending rows. Ticks
//! never overlap inside one process; a slow batch delays the next tick rather
//! than stacking up behind it. Overlap across processes is tolerated by the
//! processor's write-once status rule.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};

use dentease_common::store::StoreError;
use dentease_engine::{BatchReport, QueueProcessor};
use dentease_engine::queue::effective_batch_size;

pub struct QueuePoller {
    processor: QueueProcessor,
    batch_size: usize,
    poll_interval: Duration,
}

impl QueuePoller {
    pub fn new(processor: QueueProcessor, batch_size: usize, poll_interval_secs: u64) -> Self {
        Self {
            processor,
            batch_size: effective_batch_size(Some(batch_size)),
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Drain one batch.
    pub async fn tick(&self) -> Result<BatchReport, StoreError> {
        let report = self.processor.process_pending(self.batch_size).await?;
        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                sent = report.sent,
                skipped = report.skipped,
                errors = report.errors,
                "Queue tick complete"
            );
        } else {
            tracing::debug!("Queue empty");
        }
        Ok(report)
    }

    /// Tick forever. A failed tick is logged and the loop carries on; the rows
    /// it did not reach stay pending for the next one.
    pub async fn run(&self) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Queue poller started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Queue tick failed");
            }
        }
    }
}
