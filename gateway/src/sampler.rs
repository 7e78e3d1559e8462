//! Rolling latency sampler
//!
//! The processor records one [`ProcessingSample`] per processed event. The
//! sampler keeps a bounded ring of recent samples; when full, the oldest
//! sample is dropped so recording never waits on readers. Snapshots only
//! consider samples inside the trailing window.

use crate::clock::{sub_duration, Clock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of processing one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    Stored,
    Failed,
}

/// Latency and outcome of one processed event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingSample {
    pub latency_ms: f64,
    pub outcome: SampleOutcome,
    pub at: DateTime<Utc>,
}

/// Aggregate view over the recent window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Stored events inside the window
    pub processed: u64,
    /// Failed events inside the window
    pub failed: u64,
    /// Stored events since start
    pub processed_total: u64,
    /// Failed events since start
    pub failed_total: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Samples the percentiles were computed from
    pub sample_count: usize,
    /// Samples evicted because the buffer was full
    pub dropped: u64,
    pub window_secs: u64,
    pub taken_at: DateTime<Utc>,
}

/// Bounded, windowed latency sampler
pub struct MetricsSampler {
    samples: Mutex<VecDeque<ProcessingSample>>,
    capacity: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    processed_total: AtomicU64,
    failed_total: AtomicU64,
    dropped: AtomicU64,
}

impl MetricsSampler {
    pub fn new(capacity: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            window,
            clock,
            processed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record a sample taken now
    pub fn record(&self, latency: Duration, outcome: SampleOutcome) {
        self.push(ProcessingSample {
            latency_ms: latency.as_micros() as f64 / 1000.0,
            outcome,
            at: self.clock.now(),
        });
    }

    /// Record a sample
    pub fn push(&self, sample: ProcessingSample) {
        match sample.outcome {
            SampleOutcome::Stored => self.processed_total.fetch_add(1, Ordering::Relaxed),
            SampleOutcome::Failed => self.failed_total.fetch_add(1, Ordering::Relaxed),
        };

        let dropped = {
            let mut samples = self.samples.lock();
            let dropped = samples.len() >= self.capacity;
            if dropped {
                samples.pop_front();
            }
            samples.push_back(sample);
            dropped
        };

        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::metrics::try_record_sampler_drop();
        }
    }

    /// Current aggregate over the window
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = self.clock.now();
        let cutoff = sub_duration(now, self.window);

        let (mut latencies, processed, failed) = {
            let mut samples = self.samples.lock();
            while samples.front().is_some_and(|s| s.at <= cutoff) {
                samples.pop_front();
            }

            let mut processed = 0u64;
            let mut failed = 0u64;
            let latencies: Vec<f64> = samples
                .iter()
                .map(|s| {
                    match s.outcome {
                        SampleOutcome::Stored => processed += 1,
                        SampleOutcome::Failed => failed += 1,
                    }
                    s.latency_ms
                })
                .collect();
            (latencies, processed, failed)
        };

        latencies.sort_by(|a, b| a.total_cmp(b));

        MetricsSnapshot {
            processed,
            failed,
            processed_total: self.processed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            p99_ms: percentile(&latencies, 99.0),
            sample_count: latencies.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            window_secs: self.window.as_secs(),
            taken_at: now,
        }
    }

    /// Samples currently buffered (including ones not yet aged out)
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Nearest-rank percentile of sorted values; 0 for an empty set
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
