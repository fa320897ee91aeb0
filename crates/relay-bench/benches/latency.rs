//! Latency benchmarks for Relay.
//!
//! These benchmarks focus on the publish path from raw request body to a
//! frame sitting in a subscriber's queue.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_protocol::{codec, publish};
use std::time::Instant;
use tenvis_relay_bench::{populated_registry, sample_message};

fn json_headers() -> publish::Headers {
    let mut headers = publish::Headers::new();
    headers.insert("content-type".into(), "application/json".into());
    headers
}

/// Benchmark round-trip encode/decode latency.
fn bench_codec_roundtrip(c: &mut Criterion) {
    let message = sample_message(256);

    c.bench_function("codec_roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&message)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        });
    });
}

/// Benchmark validate + stamp + encode + broadcast + receive.
fn bench_publish_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_latency");
    let headers = json_headers();
    let body = serde_json::to_vec(&sample_message(64)).unwrap();

    for subscribers in [1usize, 10] {
        group.bench_function(format!("{}_subscribers", subscribers), |b| {
            b.iter_custom(|iters| {
                let (registry, mut subscriptions) = populated_registry(subscribers);

                let start = Instant::now();
                for _ in 0..iters {
                    let message = publish::validate(&headers, black_box(&body)).unwrap();
                    let frame = codec::encode(&message.stamped()).unwrap();
                    registry.broadcast(frame);
                    for subscription in &mut subscriptions {
                        let _ = subscription.try_recv();
                    }
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codec_roundtrip, bench_publish_latency);
criterion_main!(benches);
