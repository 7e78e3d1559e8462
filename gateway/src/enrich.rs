//! Type-indexed payload enrichment
//!
//! Enrichment is a pure `Value -> Value` transformation selected by the
//! event's `event_type` tag. Types without a registered enricher pass
//! through unchanged.

use crate::event::Event;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Enrichment function
pub type EnrichFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Registry mapping event types to enrichers
///
/// # Example
///
/// ```
/// use eventgate_gateway::enrich::EnricherRegistry;
/// use serde_json::json;
///
/// let mut registry = EnricherRegistry::new();
/// registry.register("page_view", |mut payload| {
///     payload["category"] = json!("navigation");
///     payload
/// });
///
/// assert!(registry.has("page_view"));
/// assert!(!registry.has("purchase"));
/// ```
#[derive(Clone, Default)]
pub struct EnricherRegistry {
    by_type: HashMap<String, EnrichFn>,
}

impl EnricherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the enricher for an event type
    pub fn register<F>(&mut self, event_type: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        tracing::debug!(event_type = %event_type, "registered enricher");
        self.by_type.insert(event_type, Arc::new(f));
    }

    /// Register an enricher that merges fixed fields into object payloads
    ///
    /// Existing payload fields win over the static ones; non-object payloads
    /// are left alone.
    pub fn register_static(&mut self, event_type: impl Into<String>, fields: Map<String, Value>) {
        self.register(event_type, move |payload| merge_fields(payload, &fields));
    }

    /// Apply the enricher for `event.event_type`, if any
    pub fn enrich(&self, mut event: Event) -> Event {
        if let Some(f) = self.by_type.get(&event.event_type) {
            let payload = std::mem::take(&mut event.payload);
            event.payload = f(payload);
        }
        event
    }

    pub fn has(&self, event_type: &str) -> bool {
        self.by_type.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

fn merge_fields(payload: Value, fields: &Map<String, Value>) -> Value {
    match payload {
        Value::Object(mut obj) => {
            for (key, value) in fields {
                obj.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(obj)
        }
        other => other,
    }
}
