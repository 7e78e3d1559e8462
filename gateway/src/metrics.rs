//! Prometheus metrics for the event gateway

use crate::error::{GatewayError, Result};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All gateway metrics
pub struct Metrics {
    /// Ingest decisions (by outcome)
    pub ingest_total: CounterVec,

    /// Processing outcomes (by outcome)
    pub events_processed: CounterVec,

    /// Retry attempts (by outcome)
    pub retries: CounterVec,

    /// Records escalated to dead
    pub dead_letters: Counter,

    /// Items waiting in the queue
    pub queue_depth: Gauge,

    /// Items leased to workers
    pub queue_in_flight: Gauge,

    /// Sink write latency per batch
    pub processing_latency: Histogram,

    /// Samples evicted from the sampler
    pub sampler_dropped: Counter,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            ingest_total: register_counter_vec!(
                "eventgate_ingest_total",
                "Ingest requests by outcome",
                &["outcome"]
            )
            .map_err(|e| GatewayError::Metrics(format!("ingest_total: {e}")))?,

            events_processed: register_counter_vec!(
                "eventgate_events_processed_total",
                "Events processed by outcome",
                &["outcome"]
            )
            .map_err(|e| GatewayError::Metrics(format!("events_processed: {e}")))?,

            retries: register_counter_vec!(
                "eventgate_retries_total",
                "Retry attempts by outcome",
                &["outcome"]
            )
            .map_err(|e| GatewayError::Metrics(format!("retries: {e}")))?,

            dead_letters: register_counter!(
                "eventgate_dead_letters_total",
                "Events that exhausted their retries"
            )
            .map_err(|e| GatewayError::Metrics(format!("dead_letters: {e}")))?,

            queue_depth: register_gauge!("eventgate_queue_depth", "Events waiting for delivery")
                .map_err(|e| GatewayError::Metrics(format!("queue_depth: {e}")))?,

            queue_in_flight: register_gauge!(
                "eventgate_queue_in_flight",
                "Events leased to workers"
            )
            .map_err(|e| GatewayError::Metrics(format!("queue_in_flight: {e}")))?,

            processing_latency: register_histogram!(
                "eventgate_processing_latency_seconds",
                "Storage write latency per batch",
                vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .map_err(|e| GatewayError::Metrics(format!("processing_latency: {e}")))?,

            sampler_dropped: register_counter!(
                "eventgate_sampler_dropped_total",
                "Latency samples evicted from a full sampler"
            )
            .map_err(|e| GatewayError::Metrics(format!("sampler_dropped: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| GatewayError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_ingest(&self, outcome: &str) {
        self.ingest_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_processed(&self, outcome: &str, count: u64) {
        self.events_processed
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }

    pub fn record_retry(&self, outcome: &str) {
        self.retries.with_label_values(&[outcome]).inc();
    }

    pub fn record_dead_letter(&self) {
        self.dead_letters.inc();
    }

    pub fn set_queue(&self, depth: usize, in_flight: usize) {
        self.queue_depth.set(depth as f64);
        self.queue_in_flight.set(in_flight as f64);
    }

    pub fn record_latency(&self, seconds: f64) {
        self.processing_latency.observe(seconds);
    }
}

/// Gather all metrics and encode as Prometheus text format
///
/// Returns the metrics as a String, ready to be served via HTTP.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Record an ingest decision if metrics are initialized
pub fn try_record_ingest(outcome: &str) {
    if let Some(m) = Metrics::get() {
        m.record_ingest(outcome);
    }
}

pub fn try_record_processed(outcome: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = Metrics::get() {
        m.record_processed(outcome, count);
    }
}

pub fn try_record_retry(outcome: &str) {
    if let Some(m) = Metrics::get() {
        m.record_retry(outcome);
    }
}

pub fn try_record_dead_letter() {
    if let Some(m) = Metrics::get() {
        m.record_dead_letter();
    }
}

pub fn try_set_queue(depth: usize, in_flight: usize) {
    if let Some(m) = Metrics::get() {
        m.set_queue(depth, in_flight);
    }
}

pub fn try_record_latency(seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.record_latency(seconds);
    }
}

pub fn try_record_sampler_drop() {
    if let Some(m) = Metrics::get() {
        m.sampler_dropped.inc();
    }
}
