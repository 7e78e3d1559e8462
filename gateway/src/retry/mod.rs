//! Retry coordination
//!
//! A periodic sweep claims due [`FailedEventRecord`]s, resubmits their events
//! through the processor and settles each record:
//!
//! - stored: the record is removed
//! - failed with retries left: rescheduled with exponential backoff
//! - failed with `retry_count == max_attempts`: marked dead for good
//!
//! Claims go through [`FailureStore::claim_due`], so several coordinator
//! instances can sweep concurrently without processing a record twice.

pub mod backoff;
pub mod failures;

use crate::clock::{add_duration, Clock};
use crate::error::{SinkError, StoreError};
use crate::event::EventStatus;
use crate::metrics;
use crate::processor::EventProcessor;
use crate::store::EventLedger;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub use backoff::BackoffPolicy;
pub use failures::{FailedEventRecord, FailureStore, InMemoryFailureStore, RecordStatus};

/// Sweep settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Time between sweeps
    pub sweep_interval: Duration,
    /// Maximum records claimed per sweep
    pub batch_limit: usize,
    /// Age after which another sweep may take over a claim
    pub claim_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            batch_limit: 100,
            claim_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub stored: usize,
    pub rescheduled: usize,
    pub dead: usize,
    /// Records whose settlement failed and were left claimed
    pub errors: usize,
}

enum Settled {
    Stored,
    Rescheduled,
    Dead,
}

/// Drives failed events to `stored` or `dead`
pub struct RetryCoordinator {
    failures: Arc<dyn FailureStore>,
    ledger: Arc<dyn EventLedger>,
    processor: Arc<EventProcessor>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    config: RetryConfig,
}

impl RetryCoordinator {
    pub fn new(
        failures: Arc<dyn FailureStore>,
        ledger: Arc<dyn EventLedger>,
        processor: Arc<EventProcessor>,
        backoff: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            failures,
            ledger,
            processor,
            backoff,
            clock,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> RetryConfig {
        self.config
    }

    /// Run one sweep
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let claimed = self
            .failures
            .claim_due(now, self.config.batch_limit, self.config.claim_timeout)
            .await?;

        let mut report = SweepReport {
            claimed: claimed.len(),
            ..SweepReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }

        debug!(count = claimed.len(), "retrying failed events");

        let events = claimed.iter().map(|record| record.event.clone()).collect();
        let results = self.processor.retry(events).await;

        for (record, result) in claimed.iter().zip(results) {
            match self.settle(record, result, now).await {
                Ok(Settled::Stored) => report.stored += 1,
                Ok(Settled::Rescheduled) => report.rescheduled += 1,
                Ok(Settled::Dead) => report.dead += 1,
                Err(e) => {
                    // Stays claimed; a later sweep takes it over after the claim timeout
                    error!(key = %record.key, error = %e, "failed to settle retried event");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn settle(
        &self,
        record: &FailedEventRecord,
        result: Result<(), SinkError>,
        now: DateTime<Utc>,
    ) -> Result<Settled, StoreError> {
        let key = &record.key;
        let e = match result {
            Ok(()) => {
                self.failures.resolve(key).await?;
                metrics::try_record_retry("stored");
                info!(key = %key, retry_count = record.retry_count + 1, "retry succeeded");
                return Ok(Settled::Stored);
            }
            Err(e) => e,
        };

        let retry_count = record.retry_count.saturating_add(1);
        if retry_count >= record.max_attempts {
            self.failures
                .mark_dead(key, retry_count, e.to_string(), now)
                .await?;
            if let Err(err) = self.ledger.update_status(key, EventStatus::Dead, now).await {
                error!(key = %key, error = %err, "failed to mark event dead");
            }
            metrics::try_record_retry("dead");
            metrics::try_record_dead_letter();
            warn!(key = %key, retry_count, error = %e, "retries exhausted, event is dead");
            Ok(Settled::Dead)
        } else {
            let next_retry_at = add_duration(now, self.backoff.delay(retry_count));
            self.failures
                .reschedule(key, retry_count, next_retry_at, e.to_string(), now)
                .await?;
            metrics::try_record_retry("rescheduled");
            debug!(key = %key, retry_count, next_retry_at = %next_retry_at, "retry rescheduled");
            Ok(Settled::Rescheduled)
        }
    }

    /// Sweep on a fixed interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            max_attempts = self.backoff.max_attempts,
            "retry coordinator started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.claimed > 0 => debug!(?report, "sweep finished"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "retry sweep failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("retry coordinator stopped");
    }
}
