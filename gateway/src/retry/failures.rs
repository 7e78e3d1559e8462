//! Failed-event records
//!
//! A [`FailedEventRecord`] is created when an event's storage write fails and
//! is owned by the retry coordinator from then on. The record's status moves
//! `failed -> retrying -> {removed | failed | dead}`:
//!
//! - `claim_due` atomically moves due `failed` records (and `retrying`
//!   records whose claim went stale) to `retrying`.
//! - A successful retry removes the record via `resolve`.
//! - A failed retry either reschedules (`failed` again) or marks it `dead`.
//!
//! `dead` records are kept for reporting and never claimed again.

use crate::error::StoreError;
use crate::event::{Event, EventKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::add_duration;

/// Lifecycle of a failed-event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting for `next_retry_at`
    Failed,
    /// Claimed by a sweep
    Retrying,
    /// Retries exhausted; terminal
    Dead,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Failed => "failed",
            RecordStatus::Retrying => "retrying",
            RecordStatus::Dead => "dead",
        }
    }
}

/// Retry bookkeeping for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEventRecord {
    pub key: EventKey,
    /// Copy of the event as admitted, resubmitted on retry
    pub event: Event,
    /// Retries used so far
    pub retry_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
    pub status: RecordStatus,
    /// When the current claim was taken (only while `retrying`)
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedEventRecord {
    /// Record for a first storage failure
    ///
    /// With `max_attempts == 0` there is nothing to retry and the record is
    /// dead from the start.
    pub fn first_failure(
        event: Event,
        error: impl Into<String>,
        max_attempts: u32,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if max_attempts == 0 {
            RecordStatus::Dead
        } else {
            RecordStatus::Failed
        };
        Self {
            key: event.key(),
            event,
            retry_count: 0,
            max_attempts,
            next_retry_at,
            last_error: error.into(),
            status,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.status == RecordStatus::Dead
    }

    /// Whether a sweep at `now` may claim this record
    pub fn is_claimable(&self, now: DateTime<Utc>, claim_timeout: Duration) -> bool {
        match self.status {
            RecordStatus::Failed => {
                self.next_retry_at <= now && self.retry_count < self.max_attempts
            }
            RecordStatus::Retrying => self
                .claimed_at
                .map(|claimed| add_duration(claimed, claim_timeout) <= now)
                .unwrap_or(true),
            RecordStatus::Dead => false,
        }
    }
}

/// Store of failed-event records
#[async_trait]
pub trait FailureStore: Send + Sync {
    /// Create the record for a first failure
    ///
    /// If a live record already exists for the key it is kept and only its
    /// `last_error` is refreshed. Returns the stored record.
    async fn record_failure(
        &self,
        record: FailedEventRecord,
    ) -> Result<FailedEventRecord, StoreError>;

    /// Atomically claim up to `limit` due records, oldest due first
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_timeout: Duration,
    ) -> Result<Vec<FailedEventRecord>, StoreError>;

    /// Return a claimed record to `failed` with a new schedule
    ///
    /// Returns `false` if the record is not currently claimed.
    async fn reschedule(
        &self,
        key: &EventKey,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Move a claimed record to `dead`
    async fn mark_dead(
        &self,
        key: &EventKey,
        retry_count: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Remove the record after the event was stored
    async fn resolve(&self, key: &EventKey) -> Result<Option<FailedEventRecord>, StoreError>;

    async fn get(&self, key: &EventKey) -> Result<Option<FailedEventRecord>, StoreError>;

    /// Records in `status`, oldest first
    async fn list(&self, status: RecordStatus) -> Result<Vec<FailedEventRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process failure store
///
/// Claims are conditional updates under the record's shard lock, so two
/// sweeps racing for the same record cannot both claim it.
#[derive(Debug, Default)]
pub struct InMemoryFailureStore {
    records: DashMap<EventKey, FailedEventRecord>,
}

impl InMemoryFailureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl FailureStore for InMemoryFailureStore {
    async fn record_failure(
        &self,
        record: FailedEventRecord,
    ) -> Result<FailedEventRecord, StoreError> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(mut existing) => {
                let current = existing.get_mut();
                current.last_error = record.last_error;
                current.updated_at = record.updated_at;
                Ok(current.clone())
            }
            Entry::Vacant(slot) => Ok(slot.insert(record).clone()),
        }
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_timeout: Duration,
    ) -> Result<Vec<FailedEventRecord>, StoreError> {
        let mut candidates: Vec<(DateTime<Utc>, EventKey)> = self
            .records
            .iter()
            .filter(|r| r.is_claimable(now, claim_timeout))
            .map(|r| (r.next_retry_at, r.key.clone()))
            .collect();
        candidates.sort();

        let mut claimed = Vec::new();
        for (_, key) in candidates {
            if claimed.len() >= limit {
                break;
            }
            // Re-check under the shard lock: another sweep may have won
            if let Some(mut record) = self.records.get_mut(&key) {
                if record.is_claimable(now, claim_timeout) {
                    record.status = RecordStatus::Retrying;
                    record.claimed_at = Some(now);
                    record.updated_at = now;
                    claimed.push(record.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn reschedule(
        &self,
        key: &EventKey,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(key) {
            Some(mut record) if record.status == RecordStatus::Retrying => {
                record.status = RecordStatus::Failed;
                record.retry_count = retry_count;
                record.next_retry_at = next_retry_at;
                record.last_error = error;
                record.claimed_at = None;
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_dead(
        &self,
        key: &EventKey,
        retry_count: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(key) {
            Some(mut record) if record.status == RecordStatus::Retrying => {
                record.status = RecordStatus::Dead;
                record.retry_count = retry_count;
                record.last_error = error;
                record.claimed_at = None;
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve(&self, key: &EventKey) -> Result<Option<FailedEventRecord>, StoreError> {
        Ok(self.records.remove(key).map(|(_, record)| record))
    }

    async fn get(&self, key: &EventKey) -> Result<Option<FailedEventRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn list(&self, status: RecordStatus) -> Result<Vec<FailedEventRecord>, StoreError> {
        let mut records: Vec<FailedEventRecord> = self
            .records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::IngestRequest;
    use serde_json::json;
    use std::sync::Arc;

    const CLAIM_TIMEOUT: Duration = Duration::from_secs(60);

    fn record(id: &str, now: DateTime<Utc>, due_in: Duration) -> FailedEventRecord {
        let event = Event::accepted("acme", IngestRequest::new(id, "user_action", json!({})), now);
        FailedEventRecord::first_failure(event, "boom", 3, add_duration(now, due_in), now)
    }

    #[tokio::test]
    async fn test_only_due_records_are_claimed() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        store.record_failure(record("due", now, Duration::ZERO)).await.unwrap();
        store
            .record_failure(record("later", now, Duration::from_secs(30)))
            .await
            .unwrap();

        let claimed = store.claim_due(now, 10, CLAIM_TIMEOUT).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].key.event_id, "due");
        assert_eq!(claimed[0].status, RecordStatus::Retrying);
    }

    #[tokio::test]
    async fn test_claimed_record_not_claimed_twice() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        store.record_failure(record("e1", now, Duration::ZERO)).await.unwrap();

        assert_eq!(store.claim_due(now, 10, CLAIM_TIMEOUT).await.unwrap().len(), 1);
        assert!(store.claim_due(now, 10, CLAIM_TIMEOUT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_claim_can_be_reclaimed() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        store.record_failure(record("e1", now, Duration::ZERO)).await.unwrap();
        store.claim_due(now, 10, CLAIM_TIMEOUT).await.unwrap();

        let later = add_duration(now, CLAIM_TIMEOUT);
        let reclaimed = store.claim_due(later, 10, CLAIM_TIMEOUT).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].claimed_at, Some(later));
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_claim_each_record_once() {
        let store = Arc::new(InMemoryFailureStore::new());
        let now = Utc::now();
        for i in 0..50 {
            store
                .record_failure(record(&format!("e{i}"), now, Duration::ZERO))
                .await
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.claim_due(now, 100, CLAIM_TIMEOUT).await.unwrap() })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap().len();
        }
        assert_eq!(total, 50);
    }

    #[tokio::test]
    async fn test_claim_limit_takes_oldest_due() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let start = now - chrono::TimeDelta::seconds(10);
        store.record_failure(record("newer", now, Duration::ZERO)).await.unwrap();
        store
            .record_failure(record("older", start, Duration::ZERO))
            .await
            .unwrap();

        let claimed = store.claim_due(now, 1, CLAIM_TIMEOUT).await.unwrap();
        assert_eq!(claimed[0].key.event_id, "older");
    }

    #[tokio::test]
    async fn test_reschedule_and_dead() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let key = EventKey::new("acme", "e1");
        store.record_failure(record("e1", now, Duration::ZERO)).await.unwrap();

        // Not claimed yet
        assert!(!store.reschedule(&key, 1, now, "x".into(), now).await.unwrap());

        store.claim_due(now, 10, CLAIM_TIMEOUT).await.unwrap();
        let next = add_duration(now, Duration::from_secs(2));
        assert!(store.reschedule(&key, 1, next, "again".into(), now).await.unwrap());

        let rec = store.get(&key).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Failed);
        assert_eq!(rec.retry_count, 1);
        assert_eq!(rec.next_retry_at, next);
        assert_eq!(rec.last_error, "again");

        store.claim_due(next, 10, CLAIM_TIMEOUT).await.unwrap();
        assert!(store.mark_dead(&key, 3, "final".into(), next).await.unwrap());
        assert_eq!(store.list(RecordStatus::Dead).await.unwrap().len(), 1);

        // Dead records are never claimed
        let far = add_duration(next, Duration::from_secs(3600));
        assert!(store.claim_due(far, 10, CLAIM_TIMEOUT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_failure_keeps_existing() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        store.record_failure(record("e1", now, Duration::ZERO)).await.unwrap();
        store.claim_due(now, 10, CLAIM_TIMEOUT).await.unwrap();

        let mut again = record("e1", now, Duration::ZERO);
        again.last_error = "second".into();
        let stored = store.record_failure(again).await.unwrap();

        assert_eq!(stored.status, RecordStatus::Retrying);
        assert_eq!(stored.last_error, "second");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_dead_immediately() {
        let now = Utc::now();
        let event = Event::accepted("acme", IngestRequest::new("e1", "t", json!({})), now);
        let rec = FailedEventRecord::first_failure(event, "boom", 0, now, now);
        assert!(rec.is_dead());
        assert!(!rec.is_claimable(now, CLAIM_TIMEOUT));
    }

    #[tokio::test]
    async fn test_resolve_removes() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        store.record_failure(record("e1", now, Duration::ZERO)).await.unwrap();
        assert!(store.resolve(&EventKey::new("acme", "e1")).await.unwrap().is_some());
        assert!(store.is_empty());
    }
}
