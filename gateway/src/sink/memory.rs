//! In-memory sink
//!
//! Rows are keyed by `(client_id, event_id)` with upsert semantics, so
//! rewriting a pair never creates a second row.

use crate::error::SinkError;
use crate::event::{Event, EventKey};
use crate::sink::{RowResults, StorageSink};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink that keeps stored rows in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: DashMap<EventKey, Event>,
    writes: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Total row writes, including rewrites of existing rows
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn get(&self, key: &EventKey) -> Option<Event> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Rows stored for one client
    pub fn rows_for(&self, client_id: &str) -> Vec<Event> {
        self.rows
            .iter()
            .filter(|row| row.key().client_id == client_id)
            .map(|row| row.value().clone())
            .collect()
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_batch(&self, events: &[Event]) -> Result<RowResults, SinkError> {
        for event in events {
            self.rows.insert(event.key(), event.clone());
        }
        self.writes
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        Ok(vec![Ok(()); events.len()])
    }

    async fn health(&self) -> bool {
        true
    }
}
