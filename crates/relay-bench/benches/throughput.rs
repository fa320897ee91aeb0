//! Throughput benchmarks for Relay.
//!
//! These benchmarks measure the raw fan-out throughput of the registry and
//! the cost of framing messages.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_protocol::codec;
use std::sync::Arc;
use tenvis_relay_bench::{drain, populated_registry, sample_frame, sample_message};
use tenvis_relay_core::Registry;

/// Benchmark frame encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [64usize, 1024, 65536] {
        let message = sample_message(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, message| {
            b.iter(|| codec::encode(black_box(message)))
        });
    }

    group.finish();
}

/// Benchmark registry membership changes.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("subscribe_drop", |b| {
        let registry = Arc::new(Registry::new());
        b.iter(|| drop(black_box(registry.subscribe())));
    });

    group.bench_function("snapshot_1000", |b| {
        let (registry, _subscriptions) = populated_registry(1000);
        b.iter(|| black_box(registry.snapshot()));
    });

    group.finish();
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let frame = sample_frame(64);

    for size in [10usize, 100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (registry, mut subscriptions) = populated_registry(size);

            b.iter(|| {
                let report = registry.broadcast(black_box(frame.clone()));
                drain(&mut subscriptions);
                report
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_registry, bench_fanout);
criterion_main!(benches);
