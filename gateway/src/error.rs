//! Error types for the event gateway

use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
///
/// Rate limiting and duplicate submissions are not errors: they are reported
/// as [`IngestOutcome`](crate::event::IngestOutcome) values.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed ingest payload, rejected before admission
    #[error("validation error: {0}")]
    Validation(String),

    /// A backing store or the queue cannot be reached
    #[error("{component} unavailable: {message}")]
    Unavailable {
        component: &'static str,
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Shutdown requested
    #[error("shutdown requested")]
    Shutdown,
}

impl GatewayError {
    /// True for errors the caller may resolve by retrying later
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable { .. })
    }
}

/// Error type for backing-store operations (rate windows, ledger, failures, queue)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached
    #[error("{store} unavailable: {message}")]
    Unavailable { store: &'static str, message: String },

    /// Persistence failed
    #[error("journal IO error: {0}")]
    Io(String),

    /// A persisted record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { store, message } => GatewayError::Unavailable {
                component: store,
                message,
            },
            StoreError::Io(message) => GatewayError::Unavailable {
                component: "queue",
                message,
            },
            StoreError::Corrupt(message) => GatewayError::Unavailable {
                component: "store",
                message: format!("corrupt record: {message}"),
            },
        }
    }
}

/// Error type for storage sink writes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Transient failure for a single row
    #[error("transient sink failure: {0}")]
    Transient(String),

    /// Row violates a storage constraint
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The sink is down for the whole batch
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The write did not complete in time
    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),
}

impl SinkError {
    /// Whether this failure affects the entire batch
    ///
    /// Batch outages are left to queue redelivery; everything else is
    /// handed to the retry coordinator per event.
    pub fn is_batch_outage(&self) -> bool {
        matches!(self, SinkError::Unavailable(_) | SinkError::Timeout(_))
    }
}
