/// Benchmarks for roster caching and queue writes
///
/// Run with: cargo bench -p rbook-tests

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rbook_core::{AttendanceStatus, PendingQueue, RosterTable, SqliteStore, StorageAdapter};
use rbook_sync::CacheManager;
use rbook_test_utils::{roster, submission};
use std::sync::Arc;

fn bench_cache_roster(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_roster");

    for students in [30, 120, 480] {
        group.throughput(Throughput::Elements(students as u64));
        group.bench_with_input(BenchmarkId::new("students", students), &students, |b, &students| {
            let store = Arc::new(SqliteStore::open_in_memory().unwrap());
            let table = RosterTable::new(store);
            let r = roster("CS-1-A", students);

            b.iter(|| {
                table.cache_roster(black_box(&r)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_cache_all_rosters(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("cache_all_rosters");

    for classes in [10usize, 40] {
        group.throughput(Throughput::Elements(classes as u64));
        group.bench_with_input(BenchmarkId::new("classes", classes), &classes, |b, &classes| {
            let store = Arc::new(SqliteStore::open_in_memory().unwrap());
            let kv: Arc<dyn StorageAdapter> = store.clone();
            let cache = CacheManager::new(kv, RosterTable::new(store));
            let rosters: Vec<_> = (0..classes)
                .map(|i| roster(&format!("CS-{}-{}", i / 8 + 1, i % 8), 60))
                .collect();

            b.iter(|| {
                runtime
                    .block_on(cache.cache_all_rosters(black_box(&rosters)))
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_enqueue(c: &mut Criterion) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let queue = PendingQueue::new(store);
    let mut slot = 0u64;

    c.bench_function("enqueue_distinct_keys", |b| {
        b.iter(|| {
            slot += 1;
            let sub = submission(&format!("p{}", slot), "2024-01-10", AttendanceStatus::Present, 40);
            queue.enqueue(black_box(&sub)).unwrap();
        });
    });

    c.bench_function("enqueue_same_key", |b| {
        b.iter(|| {
            let sub = submission("p1", "2024-01-10", AttendanceStatus::Absent, 40);
            queue.enqueue(black_box(&sub)).unwrap();
        });
    });
}

criterion_group!(benches, bench_cache_roster, bench_cache_all_rosters, bench_enqueue);
criterion_main!(benches);
