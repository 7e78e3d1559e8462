//! Live metrics subscriptions
//!
//! Subscribers receive periodic [`MetricsSnapshot`] pushes over a bounded
//! channel. Pushes use `try_send`: a subscriber that is not keeping up misses
//! snapshots instead of slowing the publisher, and a subscriber whose
//! receiver was dropped is removed on the next push.

use crate::sampler::{MetricsSampler, MetricsSnapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Snapshots buffered per subscriber
const SUBSCRIBER_BUFFER: usize = 8;

/// Identifier of a live subscription
pub type SubscriptionId = u64;

/// Receiving end of a subscription
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<MetricsSnapshot>,
}

impl Subscription {
    /// Consume the subscription as a stream of snapshots
    pub fn into_stream(self) -> ReceiverStream<MetricsSnapshot> {
        ReceiverStream::new(self.receiver)
    }
}

/// Registry of live-metrics subscribers
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::Sender<MetricsSnapshot>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().insert(id, tx);
        debug!(subscription = id, "metrics subscriber added");
        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscription = id, "metrics subscriber removed");
        }
        removed
    }

    /// Push a snapshot to every subscriber without waiting
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, snapshot: &MetricsSnapshot) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(subscription = id, "subscriber lagging, snapshot skipped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscription = id, "subscriber gone");
                false
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

/// Pushes sampler snapshots to subscribers at a fixed cadence
pub struct SnapshotPublisher {
    sampler: Arc<MetricsSampler>,
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
}

impl SnapshotPublisher {
    pub fn new(sampler: Arc<MetricsSampler>, registry: Arc<SubscriberRegistry>, interval: Duration) -> Self {
        Self {
            sampler,
            registry,
            interval,
        }
    }

    /// Publish one snapshot now
    pub fn publish_once(&self) -> usize {
        if self.registry.is_empty() {
            return 0;
        }
        self.registry.publish(&self.sampler.snapshot())
    }

    /// Publish on every tick until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "snapshot publisher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish_once();
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("snapshot publisher stopped");
    }
}
