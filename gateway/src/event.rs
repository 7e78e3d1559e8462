//! Event model for the gateway
//!
//! An [`Event`] is identified by its [`EventKey`], the `(client_id, event_id)`
//! pair. The same pair maps to at most one stored row no matter how often it
//! is submitted.
//!
//! # Lifecycle
//!
//! ```text
//! accepted ──► processing ──► stored
//!                  │
//!                  └──► failed ──► (retry) ──► stored | dead
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::GatewayError;

/// Maximum accepted length of an `event_id`
pub const MAX_EVENT_ID_LEN: usize = 255;

/// Maximum accepted length of an `event_type` tag
pub const MAX_EVENT_TYPE_LEN: usize = 100;

/// Identity of an event: unique per client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub client_id: String,
    pub event_id: String,
}

impl EventKey {
    pub fn new(client_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.event_id)
    }
}

/// Processing status of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Admitted, not yet confirmed on the queue
    Pending,
    Accepted,
    Processing,
    Stored,
    Failed,
    Dead,
}

impl EventStatus {
    /// Stored and dead events are never processed again
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Stored | EventStatus::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Accepted => "accepted",
            EventStatus::Processing => "processing",
            EventStatus::Stored => "stored",
            EventStatus::Failed => "failed",
            EventStatus::Dead => "dead",
        }
    }
}

/// An accepted client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub client_id: String,
    pub event_id: String,
    /// Type tag used to select enrichment
    pub event_type: String,
    /// Arbitrary structured document
    pub payload: Value,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Number of storage attempts so far
    pub attempt_count: u32,
}

impl Event {
    /// Create a freshly accepted event
    pub fn accepted(client_id: impl Into<String>, request: IngestRequest, at: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            event_id: request.event_id,
            event_type: request.event_type,
            payload: request.payload,
            status: EventStatus::Accepted,
            created_at: at,
            processed_at: None,
            attempt_count: 0,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(self.client_id.clone(), self.event_id.clone())
    }

    /// Apply a status transition
    ///
    /// Entering `processing` counts an attempt; entering `stored` stamps
    /// `processed_at`.
    pub fn transition(&mut self, status: EventStatus, at: DateTime<Utc>) {
        match status {
            EventStatus::Processing => self.attempt_count = self.attempt_count.saturating_add(1),
            EventStatus::Stored => self.processed_at = Some(at),
            _ => {}
        }
        self.status = status;
    }
}

/// A single event as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl IngestRequest {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Check the request shape before any side effect happens
    pub fn validate(&self) -> Result<(), GatewayError> {
        let id = self.event_id.trim();
        if id.is_empty() {
            return Err(GatewayError::Validation("event_id must not be empty".into()));
        }
        if self.event_id.len() > MAX_EVENT_ID_LEN {
            return Err(GatewayError::Validation(format!(
                "event_id exceeds {MAX_EVENT_ID_LEN} bytes"
            )));
        }

        if self.event_type.is_empty() {
            return Err(GatewayError::Validation("event_type must not be empty".into()));
        }
        if self.event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(GatewayError::Validation(format!(
                "event_type exceeds {MAX_EVENT_TYPE_LEN} bytes"
            )));
        }
        if let Some(bad) = self
            .event_type
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
        {
            return Err(GatewayError::Validation(format!(
                "event_type contains invalid character {bad:?}"
            )));
        }

        if !self.payload.is_object() {
            return Err(GatewayError::Validation("payload must be a JSON object".into()));
        }

        Ok(())
    }
}

/// Result of ingesting one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Admitted and durably queued
    Accepted,
    /// The `(client_id, event_id)` pair was already admitted; nothing was done
    Duplicate,
    /// The client exhausted its window
    RateLimited,
    /// The request failed validation
    InvalidPayload { reason: String },
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Accepted => "accepted",
            IngestOutcome::Duplicate => "duplicate",
            IngestOutcome::RateLimited => "rate_limited",
            IngestOutcome::InvalidPayload { .. } => "invalid_payload",
        }
    }
}
