//! Stdout sink for debugging
//!
//! Prints stored events to stdout, one line per event or as pretty JSON.

use crate::error::SinkError;
use crate::event::Event;
use crate::sink::{RowResults, StorageSink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stdout sink - prints events for debugging
pub struct StdoutSink {
    /// Pretty print payloads as indented JSON
    pretty: bool,
    /// Count of events written
    written_count: AtomicU64,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            pretty: false,
            written_count: AtomicU64::new(0),
        }
    }

    pub fn pretty() -> Self {
        Self {
            pretty: true,
            written_count: AtomicU64::new(0),
        }
    }

    /// Get total events written
    pub fn written_count(&self) -> u64 {
        self.written_count.load(Ordering::Relaxed)
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn write_batch(&self, events: &[Event]) -> Result<RowResults, SinkError> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();

        for event in events {
            if self.pretty {
                let payload = serde_json::to_string_pretty(&event.payload).unwrap_or_default();
                writeln!(stdout, "┌─ Event ─────────────────────────────────────────────").ok();
                writeln!(stdout, "│ Client:    {}", event.client_id).ok();
                writeln!(stdout, "│ ID:        {}", event.event_id).ok();
                writeln!(stdout, "│ Type:      {}", event.event_type).ok();
                writeln!(stdout, "│ Created:   {}", event.created_at.to_rfc3339()).ok();
                writeln!(stdout, "│ Attempts:  {}", event.attempt_count).ok();
                writeln!(stdout, "│ Payload:   {payload}").ok();
                writeln!(stdout, "└─────────────────────────────────────────────────────").ok();
            } else {
                writeln!(
                    stdout,
                    "[{}] {}:{} {}",
                    event.client_id, event.event_type, event.event_id, event.payload
                )
                .ok();
            }
        }

        self.written_count
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        Ok(vec![Ok(()); events.len()])
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::IngestRequest;
    use chrono::Utc;
    use serde_json::json;

    fn make_event(id: &str) -> Event {
        Event::accepted(
            "test-client",
            IngestRequest::new(id, "test", json!({"k": "v"})),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_write_events() {
        let sink = StdoutSink::new();
        let results = sink
            .write_batch(&[make_event("e1"), make_event("e2")])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(sink.written_count(), 2);
    }

    #[tokio::test]
    async fn test_pretty_write() {
        let sink = StdoutSink::pretty();
        sink.write_batch(&[make_event("e1")]).await.unwrap();
        assert_eq!(sink.written_count(), 1);
        assert!(sink.health().await);
    }
}
