//! Event processor
//!
//! Turns queue deliveries into stored rows:
//!
//! ```text
//! Delivery ──► ledger check ──► processing ──► enrich ──► sink.write_batch
//!                                                            │
//!                       ┌────────────────────────────────────┼──────────────────┐
//!                       ▼                                    ▼                  ▼
//!                 row ok: stored + ack          row failed: failed +     batch outage:
//!                                               FailedEventRecord + ack  back to accepted,
//!                                                                        no ack (redelivery)
//! ```
//!
//! Redelivered events that already reached `stored` are acknowledged without
//! touching the sink, and the sink itself upserts on `(client_id, event_id)`,
//! so reprocessing never creates a second row.

pub mod worker;

use crate::clock::{add_duration, Clock};
use crate::enrich::EnricherRegistry;
use crate::error::SinkError;
use crate::event::{Event, EventKey, EventStatus};
use crate::metrics;
use crate::queue::{Delivery, EventQueue, Receipt};
use crate::retry::backoff::BackoffPolicy;
use crate::retry::failures::{FailedEventRecord, FailureStore};
use crate::sampler::{MetricsSampler, SampleOutcome};
use crate::sink::{RowResults, StorageSink};
use crate::store::{EventLedger, InsertOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use worker::WorkerPool;

/// Batching and sink settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Maximum deliveries per sink write
    pub batch_size: usize,
    /// Longest a worker waits to fill a batch
    pub flush_interval: Duration,
    /// Bound on a single sink write
    pub sink_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(100),
            sink_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Written to the sink and acknowledged
    Stored,
    /// A redelivery of an event that was already stored; acknowledged
    AlreadyStored,
    /// Not ours to process (failed or dead); acknowledged
    Skipped,
    /// The row failed; handed to the retry coordinator and acknowledged
    Failed { error: String, dead: bool },
    /// Left on the queue for redelivery
    Deferred { error: String },
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Stored => "stored",
            ProcessOutcome::AlreadyStored => "already_stored",
            ProcessOutcome::Skipped => "skipped",
            ProcessOutcome::Failed { dead: false, .. } => "failed",
            ProcessOutcome::Failed { dead: true, .. } => "dead",
            ProcessOutcome::Deferred { .. } => "deferred",
        }
    }

    /// Whether the queue entry was acknowledged
    pub fn is_acked(&self) -> bool {
        !matches!(self, ProcessOutcome::Deferred { .. })
    }
}

enum Claim {
    Process(Event),
    AlreadyStored,
    Skip,
}

/// Per-delivery result of [`EventProcessor::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub key: EventKey,
    pub outcome: ProcessOutcome,
}

/// Processes queue deliveries into the storage sink
pub struct EventProcessor {
    ledger: Arc<dyn EventLedger>,
    queue: Arc<EventQueue>,
    sink: Arc<dyn StorageSink>,
    failures: Arc<dyn FailureStore>,
    sampler: Arc<MetricsSampler>,
    clock: Arc<dyn Clock>,
    enrichers: EnricherRegistry,
    backoff: BackoffPolicy,
    config: ProcessorConfig,
}

impl EventProcessor {
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        queue: Arc<EventQueue>,
        sink: Arc<dyn StorageSink>,
        failures: Arc<dyn FailureStore>,
        sampler: Arc<MetricsSampler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            queue,
            sink,
            failures,
            sampler,
            clock,
            enrichers: EnricherRegistry::new(),
            backoff: BackoffPolicy::default(),
            config: ProcessorConfig::default(),
        }
    }

    pub fn with_enrichers(mut self, enrichers: EnricherRegistry) -> Self {
        self.enrichers = enrichers;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> ProcessorConfig {
        self.config
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn sink(&self) -> &Arc<dyn StorageSink> {
        &self.sink
    }

    /// Process a batch of deliveries
    ///
    /// Returns one outcome per delivery, in input order.
    pub async fn process(&self, deliveries: Vec<Delivery>) -> Vec<ProcessedEvent> {
        let now = self.clock.now();
        let mut outcomes: Vec<Option<ProcessOutcome>> = vec![None; deliveries.len()];
        let keys: Vec<EventKey> = deliveries.iter().map(|d| d.event.key()).collect();
        let mut pending: Vec<(usize, Receipt, Event)> = Vec::with_capacity(deliveries.len());

        for (idx, delivery) in deliveries.into_iter().enumerate() {
            match self.claim(&delivery, now).await {
                Ok(Claim::Process(event)) => pending.push((idx, delivery.receipt, event)),
                Ok(Claim::AlreadyStored) => {
                    debug!(key = %keys[idx], "already stored, acknowledging redelivery");
                    self.ack(&delivery.receipt, &keys[idx]).await;
                    outcomes[idx] = Some(ProcessOutcome::AlreadyStored);
                }
                Ok(Claim::Skip) => {
                    self.ack(&delivery.receipt, &keys[idx]).await;
                    outcomes[idx] = Some(ProcessOutcome::Skipped);
                }
                Err(error) => {
                    warn!(key = %keys[idx], error = %error, "ledger unavailable, deferring");
                    outcomes[idx] = Some(ProcessOutcome::Deferred { error });
                }
            }
        }

        if !pending.is_empty() {
            let enriched: Vec<Event> = pending
                .iter()
                .map(|(_, _, event)| self.enrichers.enrich(event.clone()))
                .collect();

            let started = Instant::now();
            let written = self.write(&enriched).await;
            let elapsed = started.elapsed();
            metrics::try_record_latency(elapsed.as_secs_f64());

            match written {
                Err(e) if e.is_batch_outage() => {
                    warn!(
                        sink = self.sink.name(),
                        count = pending.len(),
                        error = %e,
                        "sink outage, leaving batch for redelivery"
                    );
                    for (idx, _, event) in pending {
                        self.revert(&event.key(), now).await;
                        self.sampler.record(elapsed, SampleOutcome::Failed);
                        outcomes[idx] = Some(ProcessOutcome::Deferred {
                            error: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    let rows = vec![Err(e); pending.len()];
                    self.settle_rows(pending, rows, elapsed, now, &mut outcomes)
                        .await;
                }
                Ok(rows) => {
                    self.settle_rows(pending, rows, elapsed, now, &mut outcomes)
                        .await;
                }
            }
        }

        let results: Vec<ProcessedEvent> = keys
            .into_iter()
            .zip(outcomes)
            .map(|(key, outcome)| ProcessedEvent {
                key,
                outcome: outcome.unwrap_or(ProcessOutcome::Skipped),
            })
            .collect();

        record_outcomes(&results);
        let stats = self.queue.stats();
        metrics::try_set_queue(stats.ready, stats.in_flight);

        results
    }

    /// Resubmit events on behalf of the retry coordinator
    ///
    /// Updates the ledger (`processing`, then `stored` or `failed`) and
    /// returns one write result per event; retry bookkeeping stays with the
    /// caller.
    pub async fn retry(&self, events: Vec<Event>) -> Vec<Result<(), SinkError>> {
        if events.is_empty() {
            return Vec::new();
        }
        let now = self.clock.now();

        for event in &events {
            if let Err(e) = self
                .ledger
                .update_status(&event.key(), EventStatus::Processing, now)
                .await
            {
                warn!(key = %event.key(), error = %e, "failed to mark retry as processing");
            }
        }

        let enriched: Vec<Event> = events
            .iter()
            .map(|event| self.enrichers.enrich(event.clone()))
            .collect();

        let started = Instant::now();
        let written = self.write(&enriched).await;
        let elapsed = started.elapsed();
        metrics::try_record_latency(elapsed.as_secs_f64());

        let rows: RowResults = match written {
            Ok(rows) => rows,
            Err(e) => vec![Err(e); events.len()],
        };

        for (event, row) in events.iter().zip(&rows) {
            let key = event.key();
            let (status, outcome) = match row {
                Ok(()) => (EventStatus::Stored, SampleOutcome::Stored),
                Err(_) => (EventStatus::Failed, SampleOutcome::Failed),
            };
            if let Err(e) = self.ledger.update_status(&key, status, now).await {
                error!(key = %key, error = %e, "failed to update ledger after retry");
            }
            self.sampler.record(elapsed, outcome);
        }

        rows
    }

    /// Move a delivery to `processing` if it still needs work
    ///
    /// A delivery with no ledger row (the ledger lost it, e.g. across a
    /// restart with a journaled queue) has its row restored from the queued
    /// event. Returns an error message if the ledger is unreachable.
    async fn claim(&self, delivery: &Delivery, now: DateTime<Utc>) -> Result<Claim, String> {
        let key = delivery.event.key();
        let current = match self.ledger.get(&key).await.map_err(|e| e.to_string())? {
            Some(event) => event,
            None => match self
                .ledger
                .insert_if_absent(delivery.event.clone())
                .await
                .map_err(|e| e.to_string())?
            {
                InsertOutcome::Inserted => {
                    info!(key = %key, "ledger row missing, restored from queue");
                    delivery.event.clone()
                }
                InsertOutcome::Exists(event) => event,
            },
        };

        match current.status {
            EventStatus::Pending | EventStatus::Accepted | EventStatus::Processing => {
                if delivery.is_redelivery() {
                    debug!(key = %key, delivery_count = delivery.delivery_count, "processing redelivery");
                }
                let updated = self
                    .ledger
                    .update_status(&key, EventStatus::Processing, now)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(updated.map_or(Claim::Skip, Claim::Process))
            }
            EventStatus::Stored => Ok(Claim::AlreadyStored),
            // Failed and dead rows belong to the retry coordinator
            EventStatus::Failed | EventStatus::Dead => Ok(Claim::Skip),
        }
    }

    async fn settle_rows(
        &self,
        pending: Vec<(usize, Receipt, Event)>,
        rows: RowResults,
        elapsed: Duration,
        now: DateTime<Utc>,
        outcomes: &mut [Option<ProcessOutcome>],
    ) {
        for ((idx, receipt, event), row) in pending.into_iter().zip(rows) {
            let outcome = match row {
                Ok(()) => self.settle_stored(&receipt, &event, now).await,
                Err(e) => self.settle_failed(&receipt, event, e, now).await,
            };
            let sample = match outcome {
                ProcessOutcome::Stored => SampleOutcome::Stored,
                _ => SampleOutcome::Failed,
            };
            self.sampler.record(elapsed, sample);
            outcomes[idx] = Some(outcome);
        }
    }

    async fn settle_stored(&self, receipt: &Receipt, event: &Event, now: DateTime<Utc>) -> ProcessOutcome {
        let key = event.key();
        if let Err(e) = self.ledger.update_status(&key, EventStatus::Stored, now).await {
            error!(key = %key, error = %e, "failed to mark event stored");
            return ProcessOutcome::Deferred { error: e.to_string() };
        }
        self.ack(receipt, &key).await;

        // A redelivered event may still carry a record from an earlier failure
        if let Err(e) = self.failures.resolve(&key).await {
            warn!(key = %key, error = %e, "failed to clear failure record");
        }
        debug!(key = %key, "event stored");
        ProcessOutcome::Stored
    }

    async fn settle_failed(
        &self,
        receipt: &Receipt,
        event: Event,
        error: SinkError,
        now: DateTime<Utc>,
    ) -> ProcessOutcome {
        let key = event.key();
        let message = error.to_string();
        let next_retry_at = add_duration(now, self.backoff.delay(0));
        let record = FailedEventRecord::first_failure(
            event,
            message.clone(),
            self.backoff.max_attempts,
            next_retry_at,
            now,
        );
        let dead = record.is_dead();

        // The record must exist before the queue entry goes away
        if let Err(e) = self.failures.record_failure(record).await {
            error!(key = %key, error = %e, "failed to record failure, leaving for redelivery");
            self.revert(&key, now).await;
            return ProcessOutcome::Deferred { error: e.to_string() };
        }

        let status = if dead {
            EventStatus::Dead
        } else {
            EventStatus::Failed
        };
        if let Err(e) = self.ledger.update_status(&key, status, now).await {
            error!(key = %key, error = %e, "failed to mark event failed");
        }
        self.ack(receipt, &key).await;

        if dead {
            metrics::try_record_dead_letter();
            warn!(key = %key, error = %message, "event failed with no retries allowed, marked dead");
        } else {
            warn!(key = %key, error = %message, next_retry_at = %next_retry_at, "event failed, scheduled for retry");
        }
        ProcessOutcome::Failed {
            error: message,
            dead,
        }
    }

    /// Return an event to `accepted` so its redelivery is processed normally
    async fn revert(&self, key: &EventKey, now: DateTime<Utc>) {
        if let Err(e) = self.ledger.update_status(key, EventStatus::Accepted, now).await {
            error!(key = %key, error = %e, "failed to revert event to accepted");
        }
    }

    async fn ack(&self, receipt: &Receipt, key: &EventKey) {
        match self.queue.ack(receipt).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, receipt = %receipt, "lease expired before ack"),
            Err(e) => error!(key = %key, error = %e, "failed to acknowledge delivery"),
        }
    }

    async fn write(&self, events: &[Event]) -> Result<RowResults, SinkError> {
        let timeout = self.config.sink_timeout;
        match tokio::time::timeout(timeout, self.sink.write_batch(events)).await {
            Ok(Ok(rows)) if rows.len() == events.len() => Ok(rows),
            Ok(Ok(rows)) => Err(SinkError::Unavailable(format!(
                "sink returned {} results for {} events",
                rows.len(),
                events.len()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SinkError::Timeout(timeout)),
        }
    }
}

fn record_outcomes(results: &[ProcessedEvent]) {
    for outcome in ["stored", "already_stored", "skipped", "failed", "dead", "deferred"] {
        let count = results
            .iter()
            .filter(|r| r.outcome.as_str() == outcome)
            .count();
        metrics::try_record_processed(outcome, count as u64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::admission::IdempotencyGuard;
    use crate::clock::ManualClock;
    use crate::event::IngestRequest;
    use crate::retry::failures::{InMemoryFailureStore, RecordStatus};
    use crate::sink::MemorySink;
    use crate::store::InMemoryLedger;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    /// Sink that rejects selected event ids, or everything
    struct ScriptedSink {
        inner: MemorySink,
        reject: HashSet<String>,
        outage: bool,
    }

    #[async_trait]
    impl StorageSink for ScriptedSink {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn write_batch(&self, events: &[Event]) -> Result<RowResults, SinkError> {
            if self.outage {
                return Err(SinkError::Unavailable("connection refused".into()));
            }
            let mut rows = Vec::with_capacity(events.len());
            for event in events {
                if self.reject.contains(&event.event_id) {
                    rows.push(Err(SinkError::Constraint(format!("{} rejected", event.event_id))));
                } else {
                    self.inner.write_batch(std::slice::from_ref(event)).await?;
                    rows.push(Ok(()));
                }
            }
            Ok(rows)
        }

        async fn health(&self) -> bool {
            !self.outage
        }
    }

    struct Harness {
        processor: EventProcessor,
        queue: Arc<EventQueue>,
        ledger: Arc<InMemoryLedger>,
        failures: Arc<InMemoryFailureStore>,
        sink: Arc<ScriptedSink>,
        clock: ManualClock,
    }

    fn harness(reject: &[&str], outage: bool) -> Harness {
        harness_with(reject, outage, |processor| processor)
    }

    fn harness_with(
        reject: &[&str],
        outage: bool,
        configure: impl FnOnce(EventProcessor) -> EventProcessor,
    ) -> Harness {
        let clock = ManualClock::default();
        let arc_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let queue = Arc::new(EventQueue::new(Duration::from_secs(30), arc_clock.clone()));
        let ledger = Arc::new(InMemoryLedger::new());
        let failures = Arc::new(InMemoryFailureStore::new());
        let sink = Arc::new(ScriptedSink {
            inner: MemorySink::new(),
            reject: reject.iter().map(|s| s.to_string()).collect(),
            outage,
        });
        let sampler = Arc::new(MetricsSampler::new(1000, Duration::from_secs(300), arc_clock.clone()));
        let processor = EventProcessor::new(
            ledger.clone(),
            queue.clone(),
            sink.clone(),
            failures.clone(),
            sampler,
            arc_clock,
        );
        Harness {
            processor: configure(processor),
            queue,
            ledger,
            failures,
            sink,
            clock,
        }
    }

    async fn admit(h: &Harness, ids: &[&str]) {
        let guard = IdempotencyGuard::new(h.ledger.clone());
        for id in ids {
            let event = Event::accepted(
                "acme",
                IngestRequest::new(*id, "user_action", json!({"n": id})),
                h.clock.now(),
            );
            guard.admit(event.clone()).await.unwrap();
            h.queue.enqueue(event.clone()).await.unwrap();
            guard.confirm(&event.key(), h.clock.now()).await.unwrap();
        }
    }

    async fn status(h: &Harness, id: &str) -> EventStatus {
        h.ledger
            .get(&EventKey::new("acme", id))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_batch_stored_and_acked() {
        let h = harness(&[], false);
        admit(&h, &["e1", "e2"]).await;

        let results = h.processor.process(h.queue.dequeue(10)).await;

        assert!(results.iter().all(|r| r.outcome == ProcessOutcome::Stored));
        assert_eq!(h.sink.inner.row_count(), 2);
        assert!(h.queue.is_empty());
        assert_eq!(status(&h, "e1").await, EventStatus::Stored);
    }

    #[tokio::test]
    async fn test_partial_failure_isolated_per_event() {
        let ids: Vec<String> = (1..=10).map(|i| format!("e{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let h = harness(&["e3", "e7"], false);
        admit(&h, &refs).await;

        let results = h.processor.process(h.queue.dequeue(10)).await;

        let stored = results.iter().filter(|r| r.outcome == ProcessOutcome::Stored).count();
        let failed: Vec<&str> = results
            .iter()
            .filter(|r| matches!(r.outcome, ProcessOutcome::Failed { .. }))
            .map(|r| r.key.event_id.as_str())
            .collect();
        assert_eq!(stored, 8);
        assert_eq!(failed, vec!["e3", "e7"]);

        // Every delivery is acknowledged
        assert!(h.queue.is_empty());

        let records = h.failures.list(RecordStatus::Failed).await.unwrap();
        let mut record_ids: Vec<&str> = records.iter().map(|r| r.key.event_id.as_str()).collect();
        record_ids.sort();
        assert_eq!(record_ids, vec!["e3", "e7"]);
        assert_eq!(status(&h, "e3").await, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_outage_leaves_batch_on_queue() {
        let h = harness(&[], true);
        admit(&h, &["e1", "e2"]).await;

        let results = h.processor.process(h.queue.dequeue(10)).await;

        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, ProcessOutcome::Deferred { .. })));
        assert_eq!(h.queue.in_flight(), 2);
        assert!(h.failures.is_empty());
        assert_eq!(status(&h, "e1").await, EventStatus::Accepted);

        // Redelivered after the visibility timeout
        h.clock.advance(Duration::from_secs(30));
        assert_eq!(h.queue.dequeue(10).len(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_of_stored_event_is_acked_without_write() {
        let h = harness(&[], false);
        admit(&h, &["e1"]).await;
        let first = h.queue.dequeue(1);
        let stale = first[0].clone();
        h.processor.process(first).await;

        // Simulate a second copy of the same event reaching the processor
        h.queue.enqueue(stale.event).await.unwrap();
        let results = h.processor.process(h.queue.dequeue(1)).await;

        assert_eq!(results[0].outcome, ProcessOutcome::AlreadyStored);
        assert_eq!(h.sink.inner.row_count(), 1);
        assert_eq!(h.sink.inner.write_count(), 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_missing_ledger_row_is_restored_and_stored() {
        let h = harness(&[], false);
        // Queued but unknown to the ledger, as after a restart with a fresh ledger
        let event = Event::accepted(
            "acme",
            IngestRequest::new("e1", "user_action", json!({})),
            h.clock.now(),
        );
        h.queue.enqueue(event).await.unwrap();

        let results = h.processor.process(h.queue.dequeue(1)).await;

        assert_eq!(results[0].outcome, ProcessOutcome::Stored);
        assert!(h.sink.inner.contains(&EventKey::new("acme", "e1")));
        assert_eq!(status(&h, "e1").await, EventStatus::Stored);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_pending_row_is_processed() {
        let h = harness(&[], false);
        let guard = IdempotencyGuard::new(h.ledger.clone());
        let event = Event::accepted(
            "acme",
            IngestRequest::new("e1", "user_action", json!({})),
            h.clock.now(),
        );
        // A worker may see the event before the admitting caller confirms it
        guard.admit(event.clone()).await.unwrap();
        h.queue.enqueue(event.clone()).await.unwrap();

        let results = h.processor.process(h.queue.dequeue(1)).await;
        assert_eq!(results[0].outcome, ProcessOutcome::Stored);

        // The late confirm must not move the row backwards
        guard.confirm(&event.key(), h.clock.now()).await.unwrap();
        assert_eq!(status(&h, "e1").await, EventStatus::Stored);
    }

    #[tokio::test]
    async fn test_zero_attempts_marks_dead() {
        let h = harness_with(&["e1"], false, |processor| {
            processor.with_backoff(BackoffPolicy::new(
                Duration::from_secs(1),
                Duration::from_secs(1),
                0,
            ))
        });
        admit(&h, &["e1"]).await;

        let results = h.processor.process(h.queue.dequeue(1)).await;

        assert!(matches!(results[0].outcome, ProcessOutcome::Failed { dead: true, .. }));
        assert_eq!(h.failures.list(RecordStatus::Dead).await.unwrap().len(), 1);
        assert_eq!(status(&h, "e1").await, EventStatus::Dead);
    }

    #[tokio::test]
    async fn test_enrichment_applied_before_write() {
        let mut enrichers = EnricherRegistry::new();
        enrichers.register("user_action", |mut payload| {
            payload["enriched"] = json!(true);
            payload
        });
        let h = harness_with(&[], false, |processor| processor.with_enrichers(enrichers));
        admit(&h, &["e1"]).await;

        h.processor.process(h.queue.dequeue(1)).await;

        let row = h.sink.inner.get(&EventKey::new("acme", "e1")).unwrap();
        assert_eq!(row.payload["enriched"], json!(true));
        // The ledger keeps the payload as submitted
        let ledger_row = h.ledger.get(&EventKey::new("acme", "e1")).await.unwrap().unwrap();
        assert!(ledger_row.payload.get("enriched").is_none());
    }

    #[tokio::test]
    async fn test_retry_updates_ledger() {
        let h = harness(&["e2"], false);
        admit(&h, &["e1", "e2"]).await;
        let events: Vec<Event> = h.queue.dequeue(2).into_iter().map(|d| d.event).collect();

        let rows = h.processor.retry(events).await;
        assert!(rows[0].is_ok());
        assert!(rows[1].is_err());
        assert_eq!(status(&h, "e1").await, EventStatus::Stored);
        assert_eq!(status(&h, "e2").await, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_attempt_count_increments() {
        let h = harness(&[], true);
        admit(&h, &["e1"]).await;
        h.processor.process(h.queue.dequeue(1)).await;
        h.clock.advance(Duration::from_secs(30));
        h.processor.process(h.queue.dequeue(1)).await;

        let row = h.ledger.get(&EventKey::new("acme", "e1")).await.unwrap().unwrap();
        assert_eq!(row.attempt_count, 2);
    }
}
