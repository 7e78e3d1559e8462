//! Idempotent acceptance of events
//!
//! Admission is an insert-if-absent on the ledger's `(client_id, event_id)`
//! uniqueness constraint. Whichever write commits first wins and holds a
//! `pending` reservation until its caller confirms the event is queued (or
//! revokes it if queueing failed).
//!
//! Another admission of the same pair only reports [`Admission::Duplicate`]
//! once the original is confirmed. While the reservation is pending it waits;
//! if the reservation is revoked it competes for the pair again.

use crate::error::StoreError;
use crate::event::{Event, EventKey, EventStatus};
use crate::store::{EventLedger, InsertOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long an admission waits on another caller's pending reservation
const DEFAULT_PENDING_WAIT: Duration = Duration::from_secs(2);

const PENDING_POLL: Duration = Duration::from_millis(2);

/// Outcome of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// This call reserved the pair; confirm or revoke it
    Accepted,
    /// The pair was admitted and queued before; carries the existing row
    Duplicate(Event),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// Enforces one admission per `(client_id, event_id)`
#[derive(Clone)]
pub struct IdempotencyGuard {
    ledger: Arc<dyn EventLedger>,
    pending_wait: Duration,
}

impl IdempotencyGuard {
    pub fn new(ledger: Arc<dyn EventLedger>) -> Self {
        Self {
            ledger,
            pending_wait: DEFAULT_PENDING_WAIT,
        }
    }

    pub fn with_pending_wait(mut self, wait: Duration) -> Self {
        self.pending_wait = wait;
        self
    }

    /// Reserve the event's pair unless it is already admitted
    ///
    /// Fails with [`StoreError::Unavailable`] if another caller's reservation
    /// stays pending for longer than the pending wait.
    pub async fn admit(&self, event: Event) -> Result<Admission, StoreError> {
        let key = event.key();
        let mut reservation = event;
        reservation.status = EventStatus::Pending;
        let deadline = Instant::now() + self.pending_wait;

        loop {
            match self.ledger.insert_if_absent(reservation.clone()).await? {
                InsertOutcome::Inserted => {
                    tracing::debug!(client_id = %key.client_id, event_id = %key.event_id, "event reserved");
                    return Ok(Admission::Accepted);
                }
                InsertOutcome::Exists(existing) if existing.status != EventStatus::Pending => {
                    tracing::debug!(
                        client_id = %key.client_id,
                        event_id = %key.event_id,
                        status = existing.status.as_str(),
                        "duplicate event"
                    );
                    return Ok(Admission::Duplicate(existing));
                }
                InsertOutcome::Exists(_) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Unavailable {
                            store: "idempotency",
                            message: format!("admission of {key} still pending"),
                        });
                    }
                    tokio::time::sleep(PENDING_POLL).await;
                }
            }
        }
    }

    /// Mark a reservation as queued, making later admissions duplicates
    ///
    /// A no-op if a consumer already moved the event past `pending`.
    pub async fn confirm(&self, key: &EventKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ledger
            .compare_and_set_status(key, EventStatus::Pending, EventStatus::Accepted, at)
            .await
            .map(|_| ())
    }

    /// Undo a reservation whose event could not be queued
    pub async fn revoke(&self, key: &EventKey) -> Result<(), StoreError> {
        self.ledger.remove(key).await.map(|_| ())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.ledger.ping().await
    }
}
