//! Buffer pool benchmarks: hit-path latency and shard scaling.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use petradb::recovery::WalManager;
use petradb::storage::DiskManager;
use petradb::{PageId, ShardedBufferPool};

fn build_pool(shards: usize, pages: u32) -> (ShardedBufferPool, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskManager::create(dir.path().join("bench.pdb")).unwrap();
    let wal = Arc::new(WalManager::open(dir.path().join("wal.log")).unwrap());
    let pool = ShardedBufferPool::new(shards, 64, disk, wal);
    for _ in 0..pages {
        let _ = pool.new_page().unwrap();
    }
    (pool, dir)
}

fn bench_cache_hits(c: &mut Criterion) {
    let (pool, _dir) = build_pool(16, 256);

    c.bench_function("fetch_read_hit", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let guard = pool.fetch_page_read(PageId::new(i % 256)).unwrap();
            i = i.wrapping_add(1);
            std::hint::black_box(guard.as_slice()[0]);
        });
    });
}

fn bench_shard_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_scaling");
    for shards in [1usize, 4, 16] {
        let (pool, _dir) = build_pool(shards, 128);
        group.bench_with_input(BenchmarkId::from_parameter(shards), &pool, |b, pool| {
            let mut i = 0u32;
            b.iter(|| {
                let mut guard = pool.fetch_page_write(PageId::new(i % 128)).unwrap();
                guard.as_mut_slice()[0] = (i % 256) as u8;
                i = i.wrapping_add(1);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cache_hits, bench_shard_scaling);
criterion_main!(benches);
