//! Storage sinks
//!
//! A sink is the final destination of processed events. Writes are bulk and
//! report an outcome per row, so a constraint violation on one row does not
//! fail its siblings. A sink-wide outage is reported as a single `Err` for the
//! whole batch.
//!
//! Sinks must be idempotent on `(client_id, event_id)`: writing the same pair
//! twice leaves a single row. Queue redelivery relies on this.

pub mod memory;
pub mod stdout;

use crate::error::SinkError;
use crate::event::Event;
use async_trait::async_trait;

pub use memory::MemorySink;
pub use stdout::StdoutSink;

/// Per-row results of a bulk write, in input order
pub type RowResults = Vec<Result<(), SinkError>>;

/// Sink trait - persists processed events
///
/// # Example
///
/// ```ignore
/// struct WarehouseSink {
///     client: WarehouseClient,
/// }
///
/// #[async_trait]
/// impl StorageSink for WarehouseSink {
///     fn name(&self) -> &'static str { "warehouse" }
///
///     async fn write_batch(&self, events: &[Event]) -> Result<RowResults, SinkError> {
///         self.client.upsert(events).await
///     }
///
///     async fn health(&self) -> bool {
///         self.client.ping().await.is_ok()
///     }
/// }
/// ```
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Sink name for identification and logging
    fn name(&self) -> &'static str;

    /// Write a batch of events
    ///
    /// # Returns
    /// - `Ok(results)` with exactly one entry per input event
    /// - `Err(e)` when nothing could be written
    async fn write_batch(&self, events: &[Event]) -> Result<RowResults, SinkError>;

    /// Health check for the destination
    async fn health(&self) -> bool;

    /// Flush and close on shutdown
    async fn shutdown(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
