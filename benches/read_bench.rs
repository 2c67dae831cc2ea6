// Read performance benchmarks for SableKv

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sablekv::cache::BlockCache;
use sablekv::iterator::StorageIterator;
use sablekv::memtable::MemTable;
use sablekv::sstable::{SstBuilder, Sstable};
use std::hint::black_box;
use std::sync::Arc;
use tempfile::TempDir;

fn populated_memtable(size: usize) -> MemTable {
    let memtable = MemTable::new();
    for i in 0..size {
        let key = format!("key{:08}", i);
        let value = format!("value{:08}", i);
        memtable.put(key.as_bytes(), value.as_bytes(), i as u64 + 1);
    }
    memtable
}

fn populated_sst(dir: &TempDir, size: usize, cache: Arc<BlockCache>) -> Arc<Sstable> {
    let mut builder = SstBuilder::new(4096, true);
    for i in 0..size {
        let key = format!("key{:08}", i);
        let value = format!("value{:08}", i);
        builder.add(key.as_bytes(), value.as_bytes(), i as u64 + 1).unwrap();
    }
    builder.build(cache, dir.path().join("bench.sst"), 1).unwrap()
}

fn benchmark_memtable_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_get");

    for size in [1000, 10000].iter() {
        let memtable = populated_memtable(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    let key = format!("key{:08}", i);
                    black_box(memtable.get(key.as_bytes(), u64::MAX - 1));
                }
            });
        });
    }

    group.finish();
}

fn benchmark_memtable_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_scan");

    let memtable = populated_memtable(10000);
    group.throughput(Throughput::Elements(10000));
    group.bench_function("scan_10k", |b| {
        b.iter(|| {
            let mut iter = memtable.scan(u64::MAX - 1);
            let mut count = 0;
            while iter.valid() {
                black_box(iter.key());
                count += 1;
                iter.advance();
            }
            black_box(count);
        });
    });

    group.finish();
}

fn benchmark_sst_point_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("sst_point_reads");

    let dir = TempDir::new().unwrap();
    let size = 10000;

    for cache_blocks in [0usize, 1024].iter() {
        let cache = Arc::new(BlockCache::new(*cache_blocks));
        let sst = populated_sst(&dir, size, Arc::clone(&cache));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("cache_blocks", cache_blocks),
            cache_blocks,
            |b, _| {
                b.iter(|| {
                    for i in (0..size).step_by(7) {
                        let key = format!("key{:08}", i);
                        black_box(sst.get(key.as_bytes(), size as u64).unwrap());
                    }
                });
            },
        );
        sst.del_sst().unwrap();
    }

    group.finish();
}

fn benchmark_sst_prefix_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("sst_prefix_range");

    let dir = TempDir::new().unwrap();
    let cache = Arc::new(BlockCache::new(1024));
    let sst = populated_sst(&dir, 10000, cache);

    group.bench_function("prefix_1k_of_10k", |b| {
        b.iter(|| {
            let range = sst.get_prefix_range(b"key00000", 10000).unwrap();
            black_box(range.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_memtable_get,
    benchmark_memtable_scan,
    benchmark_sst_point_reads,
    benchmark_sst_prefix_range
);
criterion_main!(benches);
