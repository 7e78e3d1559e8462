//! Admission benchmarks
//!
//! Measures the rate limiter check and the full gateway ingest path.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use eventgate_gateway::admission::{ClientLimits, InMemoryWindowStore, RateLimit, RateLimiter};
use eventgate_gateway::clock::SystemClock;
use eventgate_gateway::config::{ClientSpec, Config};
use eventgate_gateway::event::IngestRequest;
use eventgate_gateway::pipeline::Pipeline;
use eventgate_gateway::sink::MemorySink;
use serde_json::json;
use std::sync::Arc;

fn bench_rate_limiter(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("rate_limiter");

    for clients in [1, 100] {
        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("allow_{}_clients", clients), |b| {
            let mut limits = ClientLimits::new(RateLimit::per_seconds(u32::MAX, 60));
            for i in 0..clients {
                limits.register(format!("client-{}", i), None);
            }
            let limiter = RateLimiter::new(
                Arc::new(InMemoryWindowStore::new()),
                limits,
                Arc::new(SystemClock::new()),
            );
            let mut i = 0usize;

            b.iter(|| {
                i += 1;
                let client = format!("client-{}", i % clients);
                rt.block_on(async { limiter.allow(&client).await.unwrap() })
            })
        });
    }

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(1));

    let config = Config {
        rate_limit_requests_per_window: u32::MAX,
        clients: vec![ClientSpec {
            id: "bench".into(),
            limit: None,
        }],
        ..Config::default()
    };
    let parts = Pipeline::new(config)
        .sink(MemorySink::new())
        .build()
        .unwrap();
    let gateway = parts.gateway;
    let mut i = 0u64;

    group.bench_function("accept", |b| {
        b.iter(|| {
            i += 1;
            let request = IngestRequest::new(format!("event-{}", i), "bench", json!({"n": i}));
            rt.block_on(async { gateway.ingest("bench", request).await.unwrap() })
        })
    });

    group.bench_function("duplicate", |b| {
        let request = IngestRequest::new("dup", "bench", json!({}));
        rt.block_on(async { gateway.ingest("bench", request.clone()).await.unwrap() });

        b.iter(|| rt.block_on(async { gateway.ingest("bench", request.clone()).await.unwrap() }))
    });

    group.finish();
}

criterion_group!(benches, bench_rate_limiter, bench_ingest);
criterion_main!(benches);
