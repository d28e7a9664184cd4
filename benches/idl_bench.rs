//! Benchmarks for ID list algebra and block-structured inserts

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ldbm::idl::{Idl, IdlStore};
use ldbm::storage::{DbFile, OpenMode};
use tempfile::TempDir;

fn evens(n: u64) -> Idl {
    Idl::from_ids((1..=n).map(|i| i * 2))
}

fn thirds(n: u64) -> Idl {
    Idl::from_ids((1..=n).map(|i| i * 3))
}

fn algebra_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("idl_algebra");
    for n in [1_000u64, 100_000] {
        let a = evens(n);
        let b = thirds(n);

        group.bench_with_input(BenchmarkId::new("intersection", n), &n, |bench, _| {
            bench.iter(|| Idl::intersection(black_box(&a), black_box(&b)))
        });
        group.bench_with_input(BenchmarkId::new("union", n), &n, |bench, _| {
            bench.iter(|| Idl::union(black_box(&a), black_box(&b)))
        });
        group.bench_with_input(BenchmarkId::new("notin", n), &n, |bench, _| {
            bench.iter(|| Idl::notin(black_box(&a), black_box(&b)))
        });
    }
    group.finish();
}

fn store_benchmarks(c: &mut Criterion) {
    c.bench_function("idl_store_insert_10k_split", |bench| {
        bench.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let db = DbFile::open(&dir.path().join("bench.ldbm"), "bench", OpenMode::Writer)
                    .unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let store = IdlStore::new(256, 255);
                for id in 1..=10_000u64 {
                    store.insert(&db, b"=key", id).unwrap();
                }
            },
        )
    });
}

criterion_group!(benches, algebra_benchmarks, store_benchmarks);
criterion_main!(benches);
