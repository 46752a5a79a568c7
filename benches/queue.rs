//! Benchmarks for sample queue and aggregation throughput

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use posesync::{
    ControlFlags, DataSignal, DeviceIdentity, PoseAggregator, Quaternion, SampleQueue,
    SessionConfig, SessionMetrics, SharedPose, StatusBoard,
};
use rand::Rng;

fn generate_orientations(count: usize) -> Vec<Quaternion> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            Quaternion::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            )
            .normalized()
        })
        .collect()
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let data = generate_orientations(1000);

    group.throughput(Throughput::Elements(1000));

    group.bench_function("push_pop_1000", |b| {
        b.iter(|| {
            let queue = SampleQueue::new(DeviceIdentity::child("00B4391F"), 300);
            for q in &data {
                queue.push(*q);
                black_box(queue.try_pop());
            }
        })
    });

    // Every push past the first 300 evicts.
    group.bench_function("push_overflow_1000", |b| {
        b.iter(|| {
            let queue = SampleQueue::new(DeviceIdentity::child("00B4391F"), 300);
            for q in &data {
                black_box(queue.push(*q));
            }
        })
    });

    group.finish();
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let config = SessionConfig::default();
    let data = generate_orientations(100);

    group.throughput(Throughput::Elements(100 * 10));

    group.bench_function("tick_10_devices", |b| {
        let signal = Arc::new(DataSignal::new());
        let mut aggregator = PoseAggregator::new(
            Arc::new(SharedPose::new(10)),
            Arc::new(ControlFlags::new(false)),
            Arc::new(StatusBoard::new()),
            Arc::new(SessionMetrics::new()),
            Arc::clone(&signal),
            &config,
        );
        let queues: Vec<Arc<SampleQueue>> = (0..10)
            .map(|i| {
                let queue = Arc::new(SampleQueue::new(
                    DeviceIdentity::child(&format!("00B4270{}", i)),
                    config.queue_capacity,
                ));
                aggregator.add_route(i, Arc::clone(&queue));
                queue
            })
            .collect();

        b.iter(|| {
            for q in &data {
                for queue in &queues {
                    queue.push(*q);
                }
                black_box(aggregator.tick());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_queue, bench_aggregation);
criterion_main!(benches);
