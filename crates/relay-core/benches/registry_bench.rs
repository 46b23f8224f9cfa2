//! Criterion benchmarks for slot allocation and broadcast fan-out.
//!
//! Both paths run on the event loop for every connect and every inbound
//! frame, so they bound how many events per second one loop can drive.
//!
//! Run with:
//! ```bash
//! cargo bench --package relay-core --bench registry_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_core::{
    BroadcastRelay, ClientRegistry, CloseReason, DeliveryError, OriginPolicy, SlotIndex, Transport,
};

/// Transport that accepts and discards everything.
struct SinkTransport;

impl Transport for SinkTransport {
    fn send_text(&mut self, text: &str) -> Result<(), DeliveryError> {
        black_box(text);
        Ok(())
    }

    fn close(&mut self, _reason: CloseReason) {}
}

fn full_registry(capacity: usize) -> ClientRegistry<SinkTransport> {
    let mut registry = ClientRegistry::new(capacity);
    for _ in 0..capacity {
        registry
            .acquire(SinkTransport)
            .expect("registry sized to fit every acquire");
    }
    registry
}

// ── Benchmarks: acquire / release ─────────────────────────────────────────────

/// Releases the middle slot of a full registry and takes it again.
fn bench_acquire_release_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release");

    for capacity in [4usize, 32, 256] {
        let mut registry = full_registry(capacity);
        let middle = SlotIndex(capacity / 2);

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| {
                registry.release(black_box(middle));
                registry
                    .acquire(SinkTransport)
                    .expect("a slot was just released")
            })
        });
    }

    group.finish();
}

// ── Benchmarks: fan-out ───────────────────────────────────────────────────────

fn bench_broadcast_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let relay = BroadcastRelay::new(OriginPolicy::Exclude);
    let message = "x".repeat(128);

    for capacity in [4usize, 32, 256] {
        let mut registry = full_registry(capacity);

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| relay.broadcast(&mut registry, black_box(SlotIndex(0)), &message))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release_churn, bench_broadcast_fan_out);
criterion_main!(benches);
