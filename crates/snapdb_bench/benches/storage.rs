//! Storage backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snapdb_bench::random_data;
use snapdb_storage::{LogStore, LogStoreOptions, MemStore, Store};
use tempfile::TempDir;

fn commit_one(store: &dyn Store, key: &[u8], value: &[u8]) {
    let snapshot = store.last_snapshot();
    let mut ctx = store.new_context(snapshot).unwrap();
    ctx.store(key, value);
    ctx.commit(snapshot + 1).unwrap();
}

/// Benchmark MemStore commits.
fn bench_memory_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_commit");

    for size in [64, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = MemStore::new();
            let data = random_data(size);
            b.iter(|| commit_one(&store, black_box(b"key"), black_box(&data)));
        });
    }
    group.finish();
}

/// Benchmark LogStore commits with and without fsync.
fn bench_log_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_commit");
    group.sample_size(20);

    for sync in [false, true] {
        group.bench_with_input(BenchmarkId::new("sync", sync), &sync, |b, &sync| {
            let dir = TempDir::new().unwrap();
            let options = LogStoreOptions::default().sync_on_commit(sync);
            let store = LogStore::open(dir.path().join("bench.log"), options).unwrap();
            let data = random_data(256);
            b.iter(|| commit_one(&store, black_box(b"key"), black_box(&data)));
        });
    }
    group.finish();
}

/// Benchmark historical reads against a long version history.
fn bench_history_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_read");

    for versions in [10u64, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(versions), versions, |b, &versions| {
            let store = MemStore::new();
            for i in 0..versions {
                commit_one(&store, b"key", &i.to_le_bytes());
            }
            let ctx = store.new_context(versions / 2).unwrap();
            b.iter(|| black_box(ctx.get(black_box(b"key")).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark replaying a log on open.
fn bench_log_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_replay");
    group.sample_size(10);

    for batches in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*batches as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batches), batches, |b, &batches| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("replay.log");
            {
                let options = LogStoreOptions::default().sync_on_commit(false);
                let store = LogStore::open(&path, options).unwrap();
                for i in 0..batches {
                    commit_one(&store, format!("key-{i}").as_bytes(), &random_data(64));
                }
                store.close().unwrap();
            }
            b.iter(|| {
                let store = LogStore::open(&path, LogStoreOptions::default()).unwrap();
                black_box(store.last_snapshot());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_memory_commit,
    bench_log_commit,
    bench_history_read,
    bench_log_replay,
);
criterion_main!(benches);
