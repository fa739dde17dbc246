use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use std::sync::Arc;

use rookdb::common::types::Rid;
use rookdb::index::btree::BPlusTree;
use rookdb::storage::buffer::BufferPoolManager;
use rookdb::storage::disk::DiskManager;
use rookdb::transaction::Transaction;

// Create a buffer pool over a temporary database file
fn create_test_environment(buffer_pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let disk = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(buffer_pool_size, disk));

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn btree_benchmark(c: &mut Criterion) {
    let buffer_pool_size = 1000;

    let mut group = c.benchmark_group("BPlusTree");

    for size in [100, 500, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
            let buffer_pool = create_test_environment(buffer_pool_size);
            let btree = BPlusTree::<i64>::new("bench_insert", buffer_pool).unwrap();
            let txn = Transaction::new(0);

            let mut rng = StdRng::seed_from_u64(7);
            let keys: Vec<i64> = (0..size).map(|_| rng.gen::<i64>()).collect();
            let mut idx = 0;

            b.iter(|| {
                if idx >= keys.len() {
                    idx = 0;
                }
                let key = keys[idx];
                btree.insert(&key, Rid::new(0, idx as u32), &txn).unwrap();
                idx += 1;
            });
        });

        group.bench_with_input(BenchmarkId::new("lookup", size), size, |b, &size| {
            let buffer_pool = create_test_environment(buffer_pool_size);
            let btree = BPlusTree::<i64>::new("bench_lookup", buffer_pool).unwrap();
            let txn = Transaction::new(0);

            for i in 0..size {
                let key = i as i64;
                btree.insert(&key, Rid::new(0, i as u32), &txn).unwrap();
            }

            let mut rng = StdRng::seed_from_u64(11);
            b.iter(|| {
                let key = rng.gen_range(0..size) as i64;
                btree.get_value(&key, None).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("scan", size), size, |b, &size| {
            let buffer_pool = create_test_environment(buffer_pool_size);
            let btree = BPlusTree::<i64>::new("bench_scan", buffer_pool).unwrap();
            let txn = Transaction::new(0);

            for i in 0..size {
                let key = i as i64;
                btree.insert(&key, Rid::new(0, i as u32), &txn).unwrap();
            }

            b.iter(|| {
                let count = btree.begin().unwrap().count();
                assert_eq!(count, size as usize);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, btree_benchmark);
criterion_main!(benches);
