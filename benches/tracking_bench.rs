//! Hot-path benchmarks for the tracking facade

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use pizza_telemetry::store::{CounterStore, HttpMethod};
use pizza_telemetry::Tracker;

fn counter_benchmark(c: &mut Criterion) {
    let tracker = Tracker::new(Arc::new(CounterStore::new()));

    let mut group = c.benchmark_group("tracker");

    group.bench_function("http_request", |b| {
        b.iter(|| tracker.http_request(black_box(HttpMethod::Get)))
    });

    group.bench_function("auth_attempt", |b| {
        b.iter(|| tracker.auth_attempt(black_box(true)))
    });

    group.bench_function("request_guard", |b| {
        b.iter(|| {
            let guard = tracker.begin_request(HttpMethod::Post, "/api/order");
            black_box(guard.finish())
        })
    });

    group.finish();
}

fn snapshot_benchmark(c: &mut Criterion) {
    let store = CounterStore::new();

    c.bench_function("snapshot_and_reset", |b| {
        b.iter(|| {
            for method in HttpMethod::ALL {
                store.increment_http_request(method);
            }
            black_box(store.snapshot_and_reset())
        })
    });
}

criterion_group!(benches, counter_benchmark, snapshot_benchmark);
criterion_main!(benches);
