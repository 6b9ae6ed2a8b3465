//! Single-threaded lock manager benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lockmgr_bench::utils::{lock_rows_and_release, random_graph, ring_graph, shuffled_rows, transaction};
use lockmgr_core::{LockManager, LockMode, TableId};

/// Benchmark an uncontended table lock/unlock pair per mode.
fn bench_table_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_lock_unlock");

    for mode in LockMode::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, &mode| {
            let lm = LockManager::new();
            let table = TableId::new(1);
            let mut next_id = 0;

            b.iter(|| {
                // Unlocking S or X ends the growing phase, so use a fresh transaction.
                let txn = transaction(next_id);
                next_id += 1;
                lm.lock_table(&txn, black_box(mode), table).unwrap();
                lm.unlock_table(&txn, table).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark locking many rows of one table and releasing them.
fn bench_row_locks(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_lock_batch");

    for count in [10u32, 100, 1000].iter() {
        group.throughput(Throughput::Elements(u64::from(*count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let lm = LockManager::new();
            let table = TableId::new(1);
            let rows = shuffled_rows(table, count);
            let mut next_id = 0;

            b.iter(|| {
                let txn = transaction(next_id);
                next_id += 1;
                lock_rows_and_release(&lm, &txn, table, black_box(&rows));
            });
        });
    }
    group.finish();
}

/// Benchmark the IS -> S -> X upgrade path.
fn bench_upgrade(c: &mut Criterion) {
    c.bench_function("upgrade_is_s_x", |b| {
        let lm = LockManager::new();
        let table = TableId::new(1);
        let mut next_id = 0;

        b.iter(|| {
            let txn = transaction(next_id);
            next_id += 1;
            lm.lock_table(&txn, LockMode::IntentionShared, table).unwrap();
            lm.lock_table(&txn, LockMode::Shared, table).unwrap();
            lm.lock_table(&txn, LockMode::Exclusive, table).unwrap();
            lm.release_all(&txn).unwrap();
        });
    });
}

/// Benchmark cycle search on wait-for graphs.
fn bench_cycle_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle_search");

    for vertices in [16u64, 128, 1024].iter() {
        let ring = ring_graph(*vertices);
        group.bench_with_input(BenchmarkId::new("ring", vertices), &ring, |b, graph| {
            b.iter(|| black_box(graph.has_cycle()));
        });

        let random = random_graph(*vertices, *vertices as usize);
        group.bench_with_input(BenchmarkId::new("random", vertices), &random, |b, graph| {
            b.iter(|| black_box(graph.has_cycle()));
        });
    }
    group.finish();
}

/// Benchmark a detection pass over a lock table with many idle queues.
fn bench_detection_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection_pass");

    for tables in [10u32, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(tables), tables, |b, &tables| {
            let lm = LockManager::new();
            let holders: Vec<_> = (0..tables)
                .map(|t| {
                    let txn = transaction(u64::from(t));
                    lm.lock_table(&txn, LockMode::IntentionShared, TableId::new(t))
                        .unwrap();
                    txn
                })
                .collect();

            b.iter(|| black_box(lm.run_cycle_detection()));
            drop(holders);
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_table_lock,
    bench_row_locks,
    bench_upgrade,
    bench_cycle_search,
    bench_detection_pass,
);
criterion_main!(benches);
