//! End-to-end pipeline scenarios
//!
//! These tests wire a full pipeline with a manual clock and drive the
//! queue, processor and retry coordinator step by step, so every timing
//! decision is deterministic.

use async_trait::async_trait;
use eventgate_gateway::admission::RateLimit;
use eventgate_gateway::clock::{add_duration, Clock, ManualClock};
use eventgate_gateway::config::{ClientSpec, Config};
use eventgate_gateway::event::{EventKey, EventStatus, IngestOutcome, IngestRequest};
use eventgate_gateway::pipeline::{Pipeline, PipelineParts};
use eventgate_gateway::processor::{ProcessOutcome, ProcessedEvent};
use eventgate_gateway::retry::RecordStatus;
use eventgate_gateway::sink::{MemorySink, RowResults, StorageSink};
use eventgate_gateway::{Event, SinkError};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Sinks
// ============================================================================

/// Memory sink with per-event and whole-batch fault injection
#[derive(Default)]
struct FaultySink {
    inner: MemorySink,
    constraint: HashSet<String>,
    transient: HashSet<String>,
    down: AtomicBool,
    calls: AtomicU64,
}

impl FaultySink {
    fn rejecting(event_ids: &[&str]) -> Self {
        Self {
            constraint: event_ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn failing(event_ids: &[&str]) -> Self {
        Self {
            transient: event_ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageSink for FaultySink {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn write_batch(&self, events: &[Event]) -> Result<RowResults, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("connection refused".into()));
        }

        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            let row = if self.constraint.contains(&event.event_id) {
                Err(SinkError::Constraint(format!("{} rejected", event.event_id)))
            } else if self.transient.contains(&event.event_id) {
                Err(SinkError::Transient("deadlock detected".into()))
            } else {
                self.inner
                    .write_batch(std::slice::from_ref(event))
                    .await
                    .map(|_| ())
            };
            rows.push(row);
        }
        Ok(rows)
    }

    async fn health(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    parts: PipelineParts,
    sink: Arc<FaultySink>,
    clock: ManualClock,
}

impl Harness {
    fn new(config: Config, sink: FaultySink) -> Self {
        let clock = ManualClock::default();
        let sink = Arc::new(sink);
        let parts = Pipeline::new(config)
            .sink_arc(sink.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        Self { parts, sink, clock }
    }

    async fn ingest(&self, event_id: &str) -> IngestOutcome {
        self.parts
            .gateway
            .ingest("acme", request(event_id))
            .await
            .unwrap()
    }

    /// Lease everything ready and run it through the processor
    async fn drain(&self) -> Vec<ProcessedEvent> {
        let deliveries = self.parts.gateway.queue().dequeue(1000);
        self.parts.processor.process(deliveries).await
    }

    async fn status(&self, event_id: &str) -> EventStatus {
        self.parts
            .gateway
            .event(&key(event_id))
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

fn config() -> Config {
    Config {
        clients: vec![ClientSpec {
            id: "acme".into(),
            limit: None,
        }],
        ..Config::default()
    }
}

fn request(event_id: &str) -> IngestRequest {
    IngestRequest::new(event_id, "user_action", json!({"action": "click"}))
}

fn key(event_id: &str) -> EventKey {
    EventKey::new("acme", event_id)
}

fn count(results: &[ProcessedEvent], outcome: &str) -> usize {
    results.iter().filter(|r| r.outcome.as_str() == outcome).count()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_rate_limit_allows_five_then_limits() {
    let config = Config {
        clients: vec![ClientSpec {
            id: "acme".into(),
            limit: Some(RateLimit::per_seconds(5, 60)),
        }],
        ..Config::default()
    };
    let h = Harness::new(config, FaultySink::default());

    for i in 0..5 {
        assert_eq!(h.ingest(&format!("evt-{i}")).await, IngestOutcome::Accepted);
    }
    assert_eq!(h.ingest("evt-5").await, IngestOutcome::RateLimited);

    // Timestamps exactly one window old no longer count
    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.ingest("evt-6").await, IngestOutcome::Accepted);
}

#[tokio::test]
async fn test_duplicate_submission_stores_one_row() {
    let h = Harness::new(config(), FaultySink::default());

    assert_eq!(h.ingest("evt-1").await, IngestOutcome::Accepted);
    assert_eq!(h.ingest("evt-1").await, IngestOutcome::Duplicate);

    let results = h.drain().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, ProcessOutcome::Stored);

    assert_eq!(h.sink.inner.rows_for("acme").len(), 1);
    assert_eq!(h.parts.gateway.queue().stats().enqueued, 1);

    // Still a duplicate after it was stored
    assert_eq!(h.ingest("evt-1").await, IngestOutcome::Duplicate);
    assert_eq!(h.status("evt-1").await, EventStatus::Stored);
}

#[tokio::test]
async fn test_failing_event_backs_off_then_dies() {
    let config = Config {
        max_retry_attempts: 3,
        retry_base_delay_secs: 1,
        ..config()
    };
    let h = Harness::new(config, FaultySink::failing(&["evt-2"]));
    let coordinator = &h.parts.coordinator;
    let t0 = h.clock.now();

    h.ingest("evt-2").await;
    let results = h.drain().await;
    assert!(matches!(
        results[0].outcome,
        ProcessOutcome::Failed { dead: false, .. }
    ));
    assert_eq!(h.status("evt-2").await, EventStatus::Failed);

    let record = h.parts.gateway.failure(&key("evt-2")).await.unwrap().unwrap();
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.next_retry_at, add_duration(t0, Duration::from_secs(1)));

    // Not due yet
    assert_eq!(coordinator.sweep().await.unwrap().claimed, 0);

    // First retry at +1, next one 2 units later
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(coordinator.sweep().await.unwrap().rescheduled, 1);
    let record = h.parts.gateway.failure(&key("evt-2")).await.unwrap().unwrap();
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.next_retry_at, add_duration(t0, Duration::from_secs(3)));

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(coordinator.sweep().await.unwrap().claimed, 0);

    // Second retry, next one 4 units later
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(coordinator.sweep().await.unwrap().rescheduled, 1);
    let record = h.parts.gateway.failure(&key("evt-2")).await.unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.next_retry_at, add_duration(t0, Duration::from_secs(7)));

    // Third failure exhausts the attempts
    h.clock.advance(Duration::from_secs(4));
    let report = coordinator.sweep().await.unwrap();
    assert_eq!(report.dead, 1);

    let record = h.parts.gateway.failure(&key("evt-2")).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Dead);
    assert_eq!(record.retry_count, 3);
    assert_eq!(h.status("evt-2").await, EventStatus::Dead);
    assert_eq!(h.parts.gateway.dead_letters().await.unwrap().len(), 1);

    // No further retries
    let calls = h.sink.calls();
    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(coordinator.sweep().await.unwrap().claimed, 0);
    assert_eq!(h.sink.calls(), calls);
}

#[tokio::test]
async fn test_partial_batch_failure() {
    let h = Harness::new(config(), FaultySink::rejecting(&["evt-3", "evt-7"]));

    let requests = (1..=10).map(|i| request(&format!("evt-{i}"))).collect();
    let outcomes = h.parts.gateway.ingest_batch("acme", requests).await;
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Ok(IngestOutcome::Accepted))));

    let results = h.drain().await;
    assert_eq!(results.len(), 10);
    assert_eq!(count(&results, "stored"), 8);
    assert_eq!(count(&results, "failed"), 2);
    assert_eq!(h.sink.calls(), 1);

    // Every delivery was acknowledged
    let stats = h.parts.gateway.queue().stats();
    assert_eq!(stats.acked, 10);
    assert_eq!(stats.in_flight, 0);
    assert!(h.parts.gateway.queue().is_empty());

    for i in 1..=10 {
        let event_id = format!("evt-{i}");
        let record = h.parts.gateway.failure(&key(&event_id)).await.unwrap();
        assert_eq!(record.is_some(), i == 3 || i == 7, "{event_id}");
    }
}

// ============================================================================
// Idempotency under concurrency and redelivery
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_store_once() {
    let h = Harness::new(config(), FaultySink::default());
    let gateway = Arc::clone(&h.parts.gateway);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            gateway.ingest("acme", request("evt-same")).await.unwrap()
        }));
    }

    let mut accepted = 0;
    let mut duplicate = 0;
    for handle in handles {
        match handle.await.unwrap() {
            IngestOutcome::Accepted => accepted += 1,
            IngestOutcome::Duplicate => duplicate += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(duplicate, 19);

    h.drain().await;
    assert_eq!(h.sink.inner.row_count(), 1);
    assert_eq!(h.sink.inner.write_count(), 1);
}

#[tokio::test]
async fn test_redelivery_does_not_store_twice() {
    let h = Harness::new(config(), FaultySink::default());
    h.ingest("evt-1").await;

    let first = h.parts.gateway.queue().dequeue(10);
    assert_eq!(first.len(), 1);

    // Lease expires before the first consumer finishes
    h.clock.advance(Duration::from_secs(31));
    let second = h.parts.gateway.queue().dequeue(10);
    assert_eq!(second.len(), 1);
    assert!(second[0].is_redelivery());

    let results = h.parts.processor.process(second).await;
    assert_eq!(results[0].outcome, ProcessOutcome::Stored);

    let results = h.parts.processor.process(first).await;
    assert_eq!(results[0].outcome, ProcessOutcome::AlreadyStored);

    assert_eq!(h.sink.inner.write_count(), 1);
    assert_eq!(h.status("evt-1").await, EventStatus::Stored);
}

#[tokio::test]
async fn test_sink_outage_leaves_batch_for_redelivery() {
    let h = Harness::new(config(), FaultySink::default());
    h.ingest("evt-1").await;
    h.ingest("evt-2").await;

    h.sink.set_down(true);
    let results = h.drain().await;
    assert_eq!(count(&results, "deferred"), 2);
    assert_eq!(h.status("evt-1").await, EventStatus::Accepted);
    assert!(h.parts.gateway.failure(&key("evt-1")).await.unwrap().is_none());
    assert_eq!(h.parts.gateway.queue().in_flight(), 2);

    h.sink.set_down(false);
    h.clock.advance(Duration::from_secs(31));
    let results = h.drain().await;
    assert_eq!(count(&results, "stored"), 2);
    assert_eq!(h.sink.inner.row_count(), 2);
    assert!(h.parts.gateway.queue().is_empty());
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn test_journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        queue_journal: Some(dir.path().join("queue.jsonl")),
        ..config()
    };

    {
        let h = Harness::new(config.clone(), FaultySink::default());
        for i in 0..3 {
            h.ingest(&format!("evt-{i}")).await;
        }

        let first = h.parts.gateway.queue().dequeue(1);
        h.parts.processor.process(first).await;
        assert!(h.sink.inner.contains(&key("evt-0")));
    }

    // The restarted process has a fresh in-memory ledger; only the journal survives
    let h = Harness::new(config, FaultySink::default());
    assert!(h.parts.gateway.queue().is_durable());
    assert_eq!(h.parts.gateway.queue().len(), 2);
    assert!(h.parts.gateway.event(&key("evt-1")).await.unwrap().is_none());

    let results = h.drain().await;
    assert_eq!(count(&results, "stored"), 2);
    assert!(h.sink.inner.contains(&key("evt-1")));
    assert!(h.sink.inner.contains(&key("evt-2")));
    assert_eq!(h.status("evt-1").await, EventStatus::Stored);
    assert_eq!(h.status("evt-2").await, EventStatus::Stored);

    // Restored rows keep enforcing idempotency
    assert_eq!(h.ingest("evt-1").await, IngestOutcome::Duplicate);
}
