//! Pipeline - wires the gateway together
//!
//! The Pipeline is a builder that turns a [`Config`] plus pluggable backing
//! stores, a storage sink and enrichers into a running system.
//!
//! # Architecture
//!
//! ```text
//! Gateway.ingest ──► RateLimiter ──► IdempotencyGuard ──► EventQueue
//!                                                             │
//!                                            WorkerPool ◄─────┘
//!                                                │
//!                                          EventProcessor ──► StorageSink
//!                                                │   ▲
//!                                  FailureStore ◄┘   └── RetryCoordinator
//!                                                │
//!                                   MetricsSampler ──► SnapshotPublisher ──► subscribers
//! ```
//!
//! # Example
//!
//! ```ignore
//! use eventgate_gateway::{Config, Pipeline, MemorySink};
//!
//! let handle = Pipeline::new(Config::from_env()?)
//!     .sink(MemorySink::new())
//!     .enricher("page_view", |mut payload| {
//!         payload["category"] = "navigation".into();
//!         payload
//!     })
//!     .start()?;
//!
//! let outcome = handle.gateway().ingest("acme", request).await?;
//! handle.shutdown().await?;
//! ```

use crate::admission::{IdempotencyGuard, InMemoryWindowStore, RateLimiter, RateWindowStore};
use crate::broadcast::{SnapshotPublisher, SubscriberRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::enrich::EnricherRegistry;
use crate::error::{GatewayError, Result};
use crate::gateway::{Gateway, GatewayParts};
use crate::processor::{EventProcessor, WorkerPool};
use crate::queue::EventQueue;
use crate::retry::{FailureStore, InMemoryFailureStore, RetryCoordinator};
use crate::sampler::MetricsSampler;
use crate::sink::{StdoutSink, StorageSink};
use crate::store::{EventLedger, InMemoryLedger};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Pipeline builder
pub struct Pipeline {
    config: Config,
    sink: Option<Arc<dyn StorageSink>>,
    enrichers: EnricherRegistry,
    clock: Arc<dyn Clock>,
    window_store: Option<Arc<dyn RateWindowStore>>,
    ledger: Option<Arc<dyn EventLedger>>,
    failures: Option<Arc<dyn FailureStore>>,
}

impl Pipeline {
    /// Create a pipeline with in-memory stores and the system clock
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sink: None,
            enrichers: EnricherRegistry::new(),
            clock: Arc::new(SystemClock::new()),
            window_store: None,
            ledger: None,
            failures: None,
        }
    }

    /// Set the storage sink
    ///
    /// Without one, stored events are printed to stdout.
    pub fn sink<S: StorageSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Set the storage sink (Arc version)
    pub fn sink_arc(mut self, sink: Arc<dyn StorageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register an enricher for an event type
    pub fn enricher<F>(mut self, event_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.enrichers.register(event_type, f);
        self
    }

    /// Replace the enricher registry
    pub fn enrichers(mut self, enrichers: EnricherRegistry) -> Self {
        self.enrichers = enrichers;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn window_store(mut self, store: Arc<dyn RateWindowStore>) -> Self {
        self.window_store = Some(store);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn EventLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn failure_store(mut self, failures: Arc<dyn FailureStore>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Wire all components without starting any background task
    pub fn build(self) -> Result<PipelineParts> {
        self.config.validate()?;
        let config = self.config;
        let clock = self.clock;

        let queue = match &config.queue_journal {
            Some(path) => EventQueue::open(path, config.visibility_timeout(), Arc::clone(&clock))?,
            None => EventQueue::new(config.visibility_timeout(), Arc::clone(&clock)),
        };
        let queue = Arc::new(queue);

        let window_store = self
            .window_store
            .unwrap_or_else(|| Arc::new(InMemoryWindowStore::new()));
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(InMemoryLedger::new()));
        let failures = self
            .failures
            .unwrap_or_else(|| Arc::new(InMemoryFailureStore::new()));
        let sink = self.sink.unwrap_or_else(|| {
            warn!("No sink configured - stored events will be printed to stdout");
            Arc::new(StdoutSink::new())
        });

        let limiter = Arc::new(RateLimiter::new(
            window_store,
            config.client_limits(),
            Arc::clone(&clock),
        ));
        let sampler = Arc::new(MetricsSampler::new(
            config.sampler_capacity,
            config.metrics_window(),
            Arc::clone(&clock),
        ));
        let subscribers = Arc::new(SubscriberRegistry::new());
        let backoff = config.backoff();

        let processor = Arc::new(
            EventProcessor::new(
                Arc::clone(&ledger),
                Arc::clone(&queue),
                Arc::clone(&sink),
                Arc::clone(&failures),
                Arc::clone(&sampler),
                Arc::clone(&clock),
            )
            .with_enrichers(self.enrichers)
            .with_backoff(backoff)
            .with_config(config.processor()),
        );

        let coordinator = Arc::new(
            RetryCoordinator::new(
                Arc::clone(&failures),
                Arc::clone(&ledger),
                Arc::clone(&processor),
                backoff,
                Arc::clone(&clock),
            )
            .with_config(config.retry()),
        );

        let publisher = SnapshotPublisher::new(
            Arc::clone(&sampler),
            Arc::clone(&subscribers),
            config.metrics_push_interval(),
        );

        let gateway = Arc::new(Gateway::new(GatewayParts {
            limiter,
            guard: IdempotencyGuard::new(Arc::clone(&ledger)),
            queue: Arc::clone(&queue),
            ledger,
            failures,
            sampler,
            subscribers,
            clock,
        }));

        Ok(PipelineParts {
            gateway,
            processor,
            coordinator,
            publisher,
            sink,
            config,
        })
    }

    /// Build and start workers, the retry coordinator and the snapshot publisher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<PipelineHandle> {
        Ok(self.build()?.start())
    }
}

/// Wired but not yet running pipeline
pub struct PipelineParts {
    pub gateway: Arc<Gateway>,
    pub processor: Arc<EventProcessor>,
    pub coordinator: Arc<RetryCoordinator>,
    pub publisher: SnapshotPublisher,
    pub sink: Arc<dyn StorageSink>,
    pub config: Config,
}

impl PipelineParts {
    /// Spawn the background tasks
    pub fn start(self) -> PipelineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = WorkerPool::spawn(
            Arc::clone(&self.processor),
            self.config.worker_count,
            shutdown_rx.clone(),
        );
        let coordinator = tokio::spawn(Arc::clone(&self.coordinator).run(shutdown_rx.clone()));
        let publisher = tokio::spawn(self.publisher.run(shutdown_rx));

        info!(
            workers = self.config.worker_count,
            batch_size = self.config.event_batch_size,
            durable_queue = self.gateway.queue().is_durable(),
            sink = self.sink.name(),
            "Pipeline started"
        );

        PipelineHandle {
            gateway: self.gateway,
            sink: self.sink,
            shutdown_tx,
            workers,
            tasks: vec![coordinator, publisher],
        }
    }
}

/// Handle to a running pipeline
pub struct PipelineHandle {
    gateway: Arc<Gateway>,
    sink: Arc<dyn StorageSink>,
    shutdown_tx: watch::Sender<bool>,
    workers: WorkerPool,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Stop intake, let in-flight batches finish and close the sink
    ///
    /// Events still queued stay in the queue (and its journal, if any) for
    /// the next start.
    pub async fn shutdown(self) -> Result<()> {
        self.gateway.close();
        // Receivers may already be gone if a task exited early
        let _ = self.shutdown_tx.send(true);

        self.workers.join().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "background task failed");
            }
        }

        self.sink.shutdown().await.map_err(|e| GatewayError::Unavailable {
            component: "sink",
            message: e.to_string(),
        })?;

        info!("Pipeline shutdown complete");
        Ok(())
    }
}
