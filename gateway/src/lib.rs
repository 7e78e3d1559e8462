//! EventGate - event ingestion gateway
//!
//! Accepts events from authenticated clients, admits them through a per-client
//! sliding-window rate limiter and an idempotency guard, queues them, and
//! stores them in batches through a pluggable storage sink. Failed writes are
//! retried with exponential backoff until they succeed or are dead-lettered.
//!
//! # Architecture
//!
//! ```text
//! Gateway (admission) ──► EventQueue ──► EventProcessor ──► StorageSink
//!                                             │   ▲
//!                                             │   └── RetryCoordinator
//!                                             ▼
//!                                       MetricsSampler ──► subscribers
//! ```
//!
//! Stores, sink, enrichers and the clock are all pluggable via traits; see
//! [`Pipeline`] for wiring.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod admission;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod enrich;
pub mod error;
pub mod event;
pub mod gateway;
pub mod metrics;
pub mod metrics_server;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod sampler;
pub mod sink;
pub mod store;

pub use admission::{IdempotencyGuard, RateLimit, RateLimiter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use enrich::EnricherRegistry;
pub use error::{GatewayError, Result, SinkError, StoreError};
pub use event::{Event, EventKey, EventStatus, IngestOutcome, IngestRequest};
pub use gateway::{Gateway, HealthReport};
pub use pipeline::{Pipeline, PipelineHandle};
pub use processor::{EventProcessor, ProcessOutcome};
pub use queue::EventQueue;
pub use retry::{BackoffPolicy, FailedEventRecord, RetryCoordinator};
pub use sampler::{MetricsSampler, MetricsSnapshot};
pub use sink::{MemorySink, StdoutSink, StorageSink};
