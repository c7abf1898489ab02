//! Micro benchmarks for the record-backed B+Tree.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use keeldb::storage::btree::BPlusTree;
use keeldb::storage::dm::DataManager;
use keeldb::storage::EngineOptions;
use keeldb::types::Uid;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const INSERT_COUNT: i64 = 4_096;
const LOOKUP_SAMPLES: usize = 1_024;
const RANGE_WIDTH: i64 = 256;

fn micro_btree(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/btree");
    group.sample_size(20);

    group.throughput(Throughput::Elements(INSERT_COUNT as u64));
    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |tree| {
                tree.insert_keys((0..INSERT_COUNT).collect::<Vec<_>>().as_slice());
                black_box(tree.tree.boot_uid());
            },
            BatchSize::SmallInput,
        );
    });

    let mut random_keys: Vec<i64> = (0..INSERT_COUNT).collect();
    random_keys.shuffle(&mut StdRng::seed_from_u64(0xBEEF_F00D));
    group.throughput(Throughput::Elements(INSERT_COUNT as u64));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |tree| {
                tree.insert_keys(&random_keys);
                black_box(tree.tree.boot_uid());
            },
            BatchSize::SmallInput,
        );
    });

    let mut loaded = LoadedTree::new(INSERT_COUNT);
    group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
        b.iter(|| loaded.point_lookup(LOOKUP_SAMPLES));
    });

    group.throughput(Throughput::Elements(RANGE_WIDTH as u64));
    group.bench_function(BenchmarkId::new("range_scan", RANGE_WIDTH), |b| {
        b.iter(|| loaded.range_scan(RANGE_WIDTH));
    });

    group.finish();
}

struct FreshTree {
    _tmpdir: TempDir,
    _dm: Arc<DataManager>,
    tree: BPlusTree,
}

impl FreshTree {
    fn new() -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let base = tmpdir.path().join("bench");
        let dm = Arc::new(DataManager::create(&base, &EngineOptions::default()).expect("dm"));
        let boot = BPlusTree::create(&dm).expect("create tree");
        let tree = BPlusTree::load(boot, Arc::clone(&dm)).expect("load tree");
        Self {
            _tmpdir: tmpdir,
            _dm: dm,
            tree,
        }
    }

    fn insert_keys(&self, keys: &[i64]) {
        for &key in keys {
            self.tree.insert(key, Uid(key as u64 + 1)).expect("insert");
        }
    }
}

struct LoadedTree {
    fresh: FreshTree,
    max_key: i64,
    rng: StdRng,
}

impl LoadedTree {
    fn new(count: i64) -> Self {
        let fresh = FreshTree::new();
        fresh.insert_keys((0..count).collect::<Vec<_>>().as_slice());
        Self {
            fresh,
            max_key: count,
            rng: StdRng::seed_from_u64(0xFEED_FACE),
        }
    }

    fn point_lookup(&mut self, samples: usize) {
        for _ in 0..samples {
            let key = self.rng.gen_range(0..self.max_key);
            black_box(self.fresh.tree.search(key).expect("search"));
        }
    }

    fn range_scan(&mut self, width: i64) {
        for _ in 0..16 {
            let start = self.rng.gen_range(0..(self.max_key - width));
            black_box(self.fresh.tree.search_range(start, start + width).expect("range"));
        }
    }
}

criterion_group!(benches, micro_btree);
criterion_main!(benches);
