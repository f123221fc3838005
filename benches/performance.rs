//! Performance benchmarks for the connection tracker and drain.
//!
//! Run with: cargo bench
//! View HTML reports in: target/criterion/

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graceful::drain::drain;
use graceful::tracker::{spawn_tracker, ConnHandle, ConnState};

/// Benchmark feeding request lifecycles through the tracker until it drains.
fn bench_tracker_lifecycles(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("tracker_lifecycles");

    for connections in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(connections));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, &connections| {
                b.to_async(&rt).iter(|| async move {
                    let (tracker, task) = spawn_tracker();
                    let handles: Vec<_> = (0..connections).map(ConnHandle::new).collect();
                    for conn in &handles {
                        tracker.report(conn, ConnState::Active);
                    }
                    for conn in &handles {
                        tracker.report(conn, ConnState::Idle);
                    }
                    tracker.stop_and_wait().await.unwrap();
                    task.await.unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark a forced drain: every connection still active when the grace
/// period runs out.
fn bench_forced_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("forced_drain");
    group.sample_size(20);

    for connections in [10u64, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, &connections| {
                b.to_async(&rt).iter(|| async move {
                    let (tracker, task) = spawn_tracker();
                    for id in 0..connections {
                        tracker.report(&ConnHandle::new(id), ConnState::Active);
                    }
                    drain(&tracker, Duration::from_millis(1)).await;
                    task.await.unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_tracker_lifecycles, bench_forced_drain);
criterion_main!(benches);
