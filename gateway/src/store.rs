//! Event ledger
//!
//! The ledger holds one row per admitted `(client_id, event_id)` pair and
//! tracks its status. It is the uniqueness constraint the idempotency guard
//! relies on: [`EventLedger::insert_if_absent`] is an atomic
//! insert-if-absent, so concurrent admissions of the same pair race on a
//! single write and exactly one of them wins.

use crate::error::StoreError;
use crate::event::{Event, EventKey, EventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Result of an insert-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The row was written
    Inserted,
    /// A row for the pair already exists (returned unchanged)
    Exists(Event),
}

/// Store of admitted events keyed by `(client_id, event_id)`
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Insert the event unless its key is already present
    async fn insert_if_absent(&self, event: Event) -> Result<InsertOutcome, StoreError>;

    /// Read an event
    async fn get(&self, key: &EventKey) -> Result<Option<Event>, StoreError>;

    /// Transition an event's status, returning the updated row
    async fn update_status(
        &self,
        key: &EventKey,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError>;

    /// Transition an event only if it is currently in `expected`
    ///
    /// Returns `false` if the row is missing or in another status.
    async fn compare_and_set_status(
        &self,
        key: &EventKey,
        expected: EventStatus,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Delete a row (used to roll back an admission that could not be queued)
    async fn remove(&self, key: &EventKey) -> Result<Option<Event>, StoreError>;

    /// Number of rows currently in `status`
    async fn count_by_status(&self, status: EventStatus) -> Result<usize, StoreError>;

    /// Reachability check used by the health report
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process ledger backed by a sharded map
///
/// `DashMap::entry` holds the shard lock for the duration of the
/// insert-if-absent, giving the same guarantee as a unique index.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    events: DashMap<EventKey, Event>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventLedger for InMemoryLedger {
    async fn insert_if_absent(&self, event: Event) -> Result<InsertOutcome, StoreError> {
        match self.events.entry(event.key()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Exists(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(event);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, key: &EventKey) -> Result<Option<Event>, StoreError> {
        Ok(self.events.get(key).map(|e| e.value().clone()))
    }

    async fn update_status(
        &self,
        key: &EventKey,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        Ok(self.events.get_mut(key).map(|mut event| {
            event.transition(status, at);
            event.clone()
        }))
    }

    async fn compare_and_set_status(
        &self,
        key: &EventKey,
        expected: EventStatus,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(match self.events.get_mut(key) {
            Some(mut event) if event.status == expected => {
                event.transition(status, at);
                true
            }
            _ => false,
        })
    }

    async fn remove(&self, key: &EventKey) -> Result<Option<Event>, StoreError> {
        Ok(self.events.remove(key).map(|(_, event)| event))
    }

    async fn count_by_status(&self, status: EventStatus) -> Result<usize, StoreError> {
        Ok(self.events.iter().filter(|e| e.status == status).count())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
