use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use stratadb::common::types::Rid;
use stratadb::index::btree::BPlusTree;
use stratadb::storage::buffer::{BufferPoolConfig, BufferPoolManager};

fn create_bench_tree(pool_size: usize) -> BPlusTree<i64> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let config = BufferPoolConfig {
        pool_size,
        replacer_k: 2,
    };
    let buffer_pool = Arc::new(BufferPoolManager::new(config, path).unwrap());
    std::mem::forget(temp_file);

    BPlusTree::create("bench_pk", buffer_pool, 128, 128).unwrap()
}

fn btree_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BPlusTree");

    for count in [1_000i64, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_insert", count), count, |b, &count| {
            b.iter_with_setup(
                || create_bench_tree(256),
                |tree| {
                    for key in 0..count {
                        tree.insert(&key, Rid::new(1, key as u32)).unwrap();
                    }
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("point_lookup", count), count, |b, &count| {
            let tree = create_bench_tree(256);
            for key in 0..count {
                tree.insert(&key, Rid::new(1, key as u32)).unwrap();
            }
            let mut rng = StdRng::seed_from_u64(99);

            b.iter(|| {
                let key = rng.gen_range(0..count);
                let hits = tree.get_value(&key).unwrap();
                assert_eq!(hits.len(), 1);
            });
        });

        group.bench_with_input(BenchmarkId::new("full_scan", count), count, |b, &count| {
            let tree = create_bench_tree(256);
            for key in 0..count {
                tree.insert(&key, Rid::new(1, key as u32)).unwrap();
            }

            b.iter(|| {
                let scanned = tree.iter().unwrap().count();
                assert_eq!(scanned as i64, count);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, btree_benchmark);
criterion_main!(benches);
