//! Ingestion front door
//!
//! [`Gateway`] is the surface the transport layer calls into. A single ingest
//! runs the admission chain synchronously:
//!
//! ```text
//! validate ──► RateLimiter.allow ──► IdempotencyGuard.admit ──► EventQueue.enqueue
//!    │                │                        │                       │
//! invalid_payload  rate_limited            duplicate               accepted
//! ```
//!
//! The response is only `accepted` once the event is queued. Until then the
//! ledger row is a pending reservation that concurrent submissions of the
//! same pair wait on rather than report as duplicates. If the queue cannot
//! take the event, the reservation is rolled back and the caller gets
//! [`GatewayError::Unavailable`].

use crate::admission::{Admission, IdempotencyGuard, RateLimiter};
use crate::broadcast::{SubscriberRegistry, Subscription, SubscriptionId};
use crate::clock::Clock;
use crate::error::{GatewayError, Result};
use crate::event::{Event, EventKey, IngestOutcome, IngestRequest};
use crate::metrics;
use crate::queue::EventQueue;
use crate::retry::failures::{FailedEventRecord, FailureStore, RecordStatus};
use crate::sampler::{MetricsSampler, MetricsSnapshot};
use crate::store::EventLedger;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Health of one backing component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub message: String,
}

impl ComponentHealth {
    fn from_ping<E: std::fmt::Display>(result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                message: "OK".to_string(),
            },
            Err(e) => Self {
                healthy: false,
                message: e.to_string(),
            },
        }
    }
}

/// Result of the health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentHealth>,
    pub uptime_seconds: u64,
    pub events_accepted: u64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Collaborators of a [`Gateway`]
pub struct GatewayParts {
    pub limiter: Arc<RateLimiter>,
    pub guard: IdempotencyGuard,
    pub queue: Arc<EventQueue>,
    pub ledger: Arc<dyn EventLedger>,
    pub failures: Arc<dyn FailureStore>,
    pub sampler: Arc<MetricsSampler>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// Ingestion, query and health surface of the pipeline
pub struct Gateway {
    limiter: Arc<RateLimiter>,
    guard: IdempotencyGuard,
    queue: Arc<EventQueue>,
    ledger: Arc<dyn EventLedger>,
    failures: Arc<dyn FailureStore>,
    sampler: Arc<MetricsSampler>,
    subscribers: Arc<SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    start_time: Instant,
    accepted: AtomicU64,
    open: AtomicBool,
}

impl Gateway {
    pub fn new(parts: GatewayParts) -> Self {
        Self {
            limiter: parts.limiter,
            guard: parts.guard,
            queue: parts.queue,
            ledger: parts.ledger,
            failures: parts.failures,
            sampler: parts.sampler,
            subscribers: parts.subscribers,
            clock: parts.clock,
            start_time: Instant::now(),
            accepted: AtomicU64::new(0),
            open: AtomicBool::new(true),
        }
    }

    /// Ingest a single event for an authenticated client
    ///
    /// Rejections (`invalid_payload`, `rate_limited`, `duplicate`) are
    /// outcomes, not errors. Errors mean the gateway could not make a
    /// decision or could not durably record an accepted event.
    pub async fn ingest(&self, client_id: &str, request: IngestRequest) -> Result<IngestOutcome> {
        let result = self.admit(client_id, request).await;
        match &result {
            Ok(outcome) => metrics::try_record_ingest(outcome.as_str()),
            Err(_) => metrics::try_record_ingest("error"),
        }
        result
    }

    /// Ingest a batch, one outcome per request in input order
    ///
    /// Each request is admitted independently; an error on one does not stop
    /// its siblings.
    pub async fn ingest_batch(
        &self,
        client_id: &str,
        requests: Vec<IngestRequest>,
    ) -> Vec<Result<IngestOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.ingest(client_id, request).await);
        }
        outcomes
    }

    async fn admit(&self, client_id: &str, request: IngestRequest) -> Result<IngestOutcome> {
        if !self.open.load(Ordering::Acquire) {
            return Err(GatewayError::Shutdown);
        }

        if let Err(e) = request.validate() {
            let reason = match e {
                GatewayError::Validation(reason) => reason,
                other => other.to_string(),
            };
            debug!(client_id = %client_id, reason = %reason, "invalid payload");
            return Ok(IngestOutcome::InvalidPayload { reason });
        }

        if !self.limiter.allow(client_id).await? {
            return Ok(IngestOutcome::RateLimited);
        }

        let event = Event::accepted(client_id, request, self.clock.now());
        let key = event.key();

        match self.guard.admit(event.clone()).await? {
            Admission::Duplicate(_) => Ok(IngestOutcome::Duplicate),
            Admission::Accepted => match self.queue.enqueue(event).await {
                Ok(seq) => {
                    if let Err(e) = self.guard.confirm(&key, self.clock.now()).await {
                        // The event is queued; duplicates wait until a worker claims it
                        warn!(key = %key, error = %e, "failed to confirm admission");
                    }
                    self.accepted.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, seq, "event accepted");
                    Ok(IngestOutcome::Accepted)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "enqueue failed, rolling back admission");
                    if let Err(revoke_err) = self.guard.revoke(&key).await {
                        error!(key = %key, error = %revoke_err, "failed to roll back admission");
                    }
                    Err(GatewayError::Unavailable {
                        component: "queue",
                        message: e.to_string(),
                    })
                }
            },
        }
    }

    /// Current metrics snapshot (read-only)
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.sampler.snapshot()
    }

    /// Open a live-metrics subscription
    pub fn subscribe_metrics(&self) -> Subscription {
        self.subscribers.subscribe()
    }

    pub fn unsubscribe_metrics(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Healthy only if the rate-window store, the ledger and the queue are reachable
    pub async fn health(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        components.insert(
            "rate_limiter".to_string(),
            ComponentHealth::from_ping(self.limiter.ping().await),
        );
        components.insert(
            "idempotency".to_string(),
            ComponentHealth::from_ping(self.guard.ping().await),
        );
        components.insert(
            "queue".to_string(),
            ComponentHealth::from_ping(self.queue.ping()),
        );

        let healthy = components.values().all(|c| c.healthy);
        HealthReport {
            healthy,
            components,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            events_accepted: self.accepted.load(Ordering::Relaxed),
        }
    }

    /// Current ledger row for an event
    pub async fn event(&self, key: &EventKey) -> Result<Option<Event>> {
        Ok(self.ledger.get(key).await?)
    }

    /// Retry bookkeeping for an event, if it ever failed
    pub async fn failure(&self, key: &EventKey) -> Result<Option<FailedEventRecord>> {
        Ok(self.failures.get(key).await?)
    }

    /// Events that exhausted their retries
    pub async fn dead_letters(&self) -> Result<Vec<FailedEventRecord>> {
        Ok(self.failures.list(RecordStatus::Dead).await?)
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Stop accepting new events
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.queue.close();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
