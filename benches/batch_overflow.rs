//! Benchmarks for batches that overflow a bounded pool

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use veda_completion::prelude::*;

fn work(n: u64) -> u64 {
    (0..n).fold(0u64, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");

    for capacity in [1usize, 8, 64].iter() {
        let pool = BoundedPool::with_capacity(4, *capacity).expect("Failed to build pool");
        let executor = ResilientBatchExecutor::new(&pool);

        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            capacity,
            |b, _| {
                b.iter(|| {
                    let units: Vec<_> = (0..64u64).map(|i| move || work(black_box(i * 100))).collect();
                    executor.execute(units).unwrap()
                })
            },
        );
    }

    group.bench_function("sequential", |b| {
        b.iter(|| (0..64u64).map(|i| work(black_box(i * 100))).collect::<Vec<_>>())
    });

    group.finish();
}

criterion_group!(benches, bench_batch);
criterion_main!(benches);
