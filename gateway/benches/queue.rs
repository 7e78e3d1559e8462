//! Queue benchmarks
//!
//! Measures enqueue and dequeue/ack throughput of the in-memory queue.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use eventgate_gateway::clock::SystemClock;
use eventgate_gateway::event::{Event, IngestRequest};
use eventgate_gateway::queue::EventQueue;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn make_event(i: usize) -> Event {
    Event::accepted(
        "bench",
        IngestRequest::new(format!("event-{}", i), "bench", json!({"n": i})),
        Utc::now(),
    )
}

fn queue() -> EventQueue {
    EventQueue::new(Duration::from_secs(30), Arc::new(SystemClock::new()))
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_enqueue");

    for batch_size in [1, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_function(format!("batch_{}", batch_size), |b| {
            let events: Vec<Event> = (0..batch_size).map(make_event).collect();
            b.iter_batched(
                || (queue(), events.clone()),
                |(queue, events)| {
                    rt.block_on(async {
                        for event in events {
                            queue.enqueue(event).await.unwrap();
                        }
                    })
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_dequeue_ack(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_dequeue_ack");

    for batch_size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_function(format!("batch_{}", batch_size), |b| {
            b.iter_batched(
                || {
                    let queue = queue();
                    rt.block_on(async {
                        for i in 0..batch_size {
                            queue.enqueue(make_event(i)).await.unwrap();
                        }
                    });
                    queue
                },
                |queue| {
                    rt.block_on(async {
                        for delivery in queue.dequeue(batch_size) {
                            queue.ack(&delivery.receipt).await.unwrap();
                        }
                    })
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_dequeue_ack);
criterion_main!(benches);
