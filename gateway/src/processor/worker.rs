//! Worker pool consuming the event queue
//!
//! Each worker fills a batch up to `batch_size` deliveries or until
//! `flush_interval` elapses, whichever comes first, then hands it to the
//! processor. A batch that is being written is always finished; deliveries
//! collected but not yet written when shutdown arrives are released back to
//! the queue.

use crate::processor::EventProcessor;
use crate::queue::{Delivery, EventQueue};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fixed-size pool of queue consumers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `count` workers sharing one processor
    pub fn spawn(
        processor: Arc<EventProcessor>,
        count: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let processor = Arc::clone(&processor);
                let shutdown = shutdown.clone();
                tokio::spawn(run_worker(id, processor, shutdown))
            })
            .collect();

        info!(workers = count, "worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

async fn run_worker(id: usize, processor: Arc<EventProcessor>, mut shutdown: watch::Receiver<bool>) {
    let queue = Arc::clone(processor.queue());
    let config = processor.config();
    let batch_size = config.batch_size.max(1);

    debug!(worker = id, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut batch: Vec<Delivery> = Vec::with_capacity(batch_size);
        let deadline = Instant::now() + config.flush_interval;

        let stop = loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                deliveries = queue.dequeue_wait(batch_size - batch.len(), wait) => {
                    batch.extend(deliveries);
                }
                _ = shutdown.changed() => break true,
            }
            if batch.len() >= batch_size || Instant::now() >= deadline {
                break false;
            }
        };

        if stop {
            release_all(&queue, batch, id);
            break;
        }
        if batch.is_empty() {
            continue;
        }

        debug!(worker = id, count = batch.len(), "processing batch");
        processor.process(batch).await;
    }

    debug!(worker = id, "worker stopped");
}

fn release_all(queue: &EventQueue, batch: Vec<Delivery>, worker: usize) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    for delivery in batch {
        queue.release(&delivery.receipt);
    }
    debug!(worker, count, "released unprocessed deliveries on shutdown");
}
