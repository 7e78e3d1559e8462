//! Durable at-least-once work queue between ingestion and processing
//!
//! # Delivery Model
//!
//! ```text
//! enqueue ──► ready ──dequeue──► in-flight ──ack──► gone
//!               ▲                    │
//!               └── visibility timeout expired / release
//! ```
//!
//! A dequeued item is leased to one consumer for `visibility_timeout`. If it
//! is not acknowledged in time it becomes eligible again, so a consumer crash
//! between dequeue and ack leads to redelivery. Consumers must therefore
//! tolerate seeing the same event twice.
//!
//! With a journal configured, every enqueue and ack is persisted before the
//! call returns, and un-acknowledged events are restored on restart. Journal
//! writes run on the blocking pool; the journal's async mutex orders them and
//! is held while the in-memory state is updated, so a compaction snapshot
//! always matches the file.

pub mod journal;

use crate::clock::{add_duration, Clock};
use crate::error::StoreError;
use crate::event::Event;
use chrono::{DateTime, Utc};
use journal::{Journal, JournalRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};

/// Acks written before the journal is compacted
pub const DEFAULT_COMPACT_AFTER: u64 = 10_000;

/// Handle identifying one delivery of a queued item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A leased queue item
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub event: Event,
    /// How many times this item has been handed out, including this one
    pub delivery_count: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub in_flight: usize,
    pub enqueued: u64,
    pub delivered: u64,
    pub redelivered: u64,
    pub acked: u64,
    pub compactions: u64,
}

struct QueuedItem {
    seq: u64,
    event: Event,
    delivery_count: u32,
}

struct Lease {
    item: QueuedItem,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueuedItem>,
    in_flight: HashMap<Receipt, Lease>,
}

impl QueueState {
    /// Every un-acknowledged item, in sequence order
    fn pending(&self) -> Vec<(u64, Event)> {
        let mut pending: Vec<(u64, Event)> = self
            .ready
            .iter()
            .chain(self.in_flight.values().map(|lease| &lease.item))
            .map(|item| (item.seq, item.event.clone()))
            .collect();
        pending.sort_by_key(|(seq, _)| *seq);
        pending
    }
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    redelivered: AtomicU64,
    acked: AtomicU64,
    compactions: AtomicU64,
}

/// At-least-once FIFO queue
pub struct EventQueue {
    state: Mutex<QueueState>,
    journal: Option<Arc<AsyncMutex<Journal>>>,
    journal_path: Option<PathBuf>,
    compact_after: u64,
    next_seq: AtomicU64,
    visibility_timeout: Duration,
    clock: Arc<dyn Clock>,
    notify: Notify,
    counters: Counters,
    closed: AtomicBool,
}

impl EventQueue {
    /// Create an in-memory queue
    pub fn new(visibility_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            journal: None,
            journal_path: None,
            compact_after: DEFAULT_COMPACT_AFTER,
            next_seq: AtomicU64::new(1),
            visibility_timeout,
            clock,
            notify: Notify::new(),
            counters: Counters::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a journaled queue, restoring un-acknowledged events
    ///
    /// Blocks on file I/O; call it during startup.
    pub fn open(
        path: impl AsRef<Path>,
        visibility_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let (journal, replay) = Journal::open(path)?;

        let restored = replay.pending.len();
        let ready: VecDeque<QueuedItem> = replay
            .pending
            .into_iter()
            .map(|(seq, event)| QueuedItem {
                seq,
                event,
                delivery_count: 0,
            })
            .collect();

        tracing::info!(
            path = %journal.path().display(),
            restored,
            skipped = replay.skipped,
            "queue journal opened"
        );

        let journal_path = journal.path().to_path_buf();
        let queue = Self {
            state: Mutex::new(QueueState {
                ready,
                in_flight: HashMap::new(),
            }),
            journal: Some(Arc::new(AsyncMutex::new(journal))),
            journal_path: Some(journal_path),
            compact_after: DEFAULT_COMPACT_AFTER,
            next_seq: AtomicU64::new(replay.last_seq + 1),
            visibility_timeout,
            clock,
            notify: Notify::new(),
            counters: Counters::default(),
            closed: AtomicBool::new(false),
        };
        Ok(queue)
    }

    /// Compact the journal after this many acks
    pub fn with_compact_after(mut self, acks: u64) -> Self {
        self.compact_after = acks.max(1);
        self
    }

    /// Durably add an event to the tail of the queue
    ///
    /// Returns once the event is persisted (when journaled) and visible to
    /// consumers.
    pub async fn enqueue(&self, event: Event) -> Result<u64, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Unavailable {
                store: "queue",
                message: "queue is closed".to_string(),
            });
        }

        let seq = match &self.journal {
            Some(journal) => {
                let guard = Arc::clone(journal).lock_owned().await;
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let record = JournalRecord::Enqueued {
                    seq,
                    event: event.clone(),
                };
                let guard = append_blocking(guard, record).await?;
                self.push_ready(seq, event);
                drop(guard);
                seq
            }
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                self.push_ready(seq, event);
                seq
            }
        };

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(seq)
    }

    fn push_ready(&self, seq: u64, event: Event) {
        self.state.lock().ready.push_back(QueuedItem {
            seq,
            event,
            delivery_count: 0,
        });
    }

    /// Lease up to `batch_size` items
    ///
    /// Expired leases are returned to the ready list first, so a redelivered
    /// item may overtake items enqueued after it.
    pub fn dequeue(&self, batch_size: usize) -> Vec<Delivery> {
        let now = self.clock.now();
        let expires_at = add_duration(now, self.visibility_timeout);
        let mut state = self.state.lock();

        Self::reclaim_expired(&mut state, now);

        let take = batch_size.min(state.ready.len());
        let items: Vec<QueuedItem> = state.ready.drain(..take).collect();
        let mut deliveries = Vec::with_capacity(take);
        for mut item in items {
            item.delivery_count = item.delivery_count.saturating_add(1);
            let receipt = Receipt::new();
            if item.delivery_count > 1 {
                self.counters.redelivered.fetch_add(1, Ordering::Relaxed);
            }
            deliveries.push(Delivery {
                receipt: receipt.clone(),
                event: item.event.clone(),
                delivery_count: item.delivery_count,
            });
            state.in_flight.insert(receipt, Lease { item, expires_at });
        }

        self.counters
            .delivered
            .fetch_add(deliveries.len() as u64, Ordering::Relaxed);
        deliveries
    }

    /// Lease up to `batch_size` items, waiting up to `poll` for work to arrive
    pub async fn dequeue_wait(&self, batch_size: usize, poll: Duration) -> Vec<Delivery> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let deliveries = self.dequeue(batch_size);
        if !deliveries.is_empty() {
            return deliveries;
        }

        let _ = tokio::time::timeout(poll, notified).await;
        self.dequeue(batch_size)
    }

    fn reclaim_expired(state: &mut QueueState, now: DateTime<Utc>) {
        let expired: Vec<Receipt> = state
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut items: Vec<QueuedItem> = expired
            .iter()
            .filter_map(|receipt| state.in_flight.remove(receipt))
            .map(|lease| lease.item)
            .collect();
        items.sort_by_key(|item| std::cmp::Reverse(item.seq));

        tracing::debug!(count = items.len(), "visibility timeout expired, requeueing");
        for item in items {
            state.ready.push_front(item);
        }
    }

    /// Acknowledge a delivery, removing the item for good
    ///
    /// Returns `false` if the receipt is unknown, e.g. because its lease
    /// already expired and the item was handed to another consumer.
    pub async fn ack(&self, receipt: &Receipt) -> Result<bool, StoreError> {
        let Some(journal) = &self.journal else {
            let removed = self.state.lock().in_flight.remove(receipt).is_some();
            if removed {
                self.counters.acked.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(removed);
        };

        let guard = Arc::clone(journal).lock_owned().await;
        let lease = self.state.lock().in_flight.remove(receipt);
        let Some(lease) = lease else {
            return Ok(false);
        };

        let record = JournalRecord::Acked { seq: lease.item.seq };
        let guard = match append_blocking(guard, record).await {
            Ok(guard) => guard,
            Err(e) => {
                // Put the lease back so the item is not lost from this process either
                self.state.lock().in_flight.insert(receipt.clone(), lease);
                return Err(e);
            }
        };
        self.counters.acked.fetch_add(1, Ordering::Relaxed);

        if guard.acks_since_compaction() >= self.compact_after {
            self.compact(guard).await;
        }
        Ok(true)
    }

    /// Rewrite the journal down to the un-acknowledged items
    ///
    /// Failure only leaves a longer file behind, so it is logged, not returned.
    async fn compact(&self, guard: OwnedMutexGuard<Journal>) {
        let pending = self.state.lock().pending();
        let count = pending.len();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            guard.compact_to(&pending)
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.counters.compactions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pending = count, "queue journal compacted");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "queue journal compaction failed"),
            Err(e) => tracing::warn!(error = %e, "queue journal compaction task failed"),
        }
    }

    /// Give a delivery back without acknowledging it
    ///
    /// The item becomes immediately eligible again, at the head of the queue.
    pub fn release(&self, receipt: &Receipt) -> bool {
        let mut state = self.state.lock();
        match state.in_flight.remove(receipt) {
            Some(lease) => {
                state.ready.push_front(lease.item);
                drop(state);
                self.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Refuse further enqueues; queued and leased items are unaffected
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Items waiting for delivery
    pub fn len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.in_flight.is_empty()
    }

    /// Items currently leased
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    pub fn stats(&self) -> QueueStats {
        let (ready, in_flight) = {
            let state = self.state.lock();
            (state.ready.len(), state.in_flight.len())
        };
        QueueStats {
            ready,
            in_flight,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            redelivered: self.counters.redelivered.load(Ordering::Relaxed),
            acked: self.counters.acked.load(Ordering::Relaxed),
            compactions: self.counters.compactions.load(Ordering::Relaxed),
        }
    }

    /// Reachability check used by the health report
    pub fn ping(&self) -> Result<(), StoreError> {
        match &self.journal_path {
            Some(path) => std::fs::metadata(path)
                .map(|_| ())
                .map_err(|e| StoreError::Unavailable {
                    store: "queue",
                    message: e.to_string(),
                }),
            None => Ok(()),
        }
    }
}

/// Append a record on the blocking pool, handing the guard back on success
async fn append_blocking(
    guard: OwnedMutexGuard<Journal>,
    record: JournalRecord,
) -> Result<OwnedMutexGuard<Journal>, StoreError> {
    tokio::task::spawn_blocking(move || {
        let mut guard = guard;
        guard.append(&record).map(|()| guard)
    })
    .await
    .map_err(|e| StoreError::Unavailable {
        store: "queue",
        message: format!("journal writer failed: {e}"),
    })?
}
