//! Benchmarks for talus store components.
//!
//! Run with: cargo bench --package talus

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use talus::{Block, FileManager, FilterDefinition, Measurement, Record, Store, StoreConfig};
use std::time::Duration;
use tempfile::TempDir;

/// Regular-interval samples with a slowly varying value.
fn generate_block(count: usize) -> Block {
    let mut block = Block::new();
    let mut value = 50.0;
    for i in 0..count {
        value += (i as f64 * 0.1).sin() * 0.1;
        block.push(Record {
            series_id: 1,
            ts: 1_000_000 + (i as i64) * 10,
            value,
        });
    }
    block
}

fn bench_block_encode(c: &mut Criterion) {
    let block = generate_block(10_000);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("encode_10k", |b| {
        b.iter(|| black_box(&block).encode_records(0))
    });
    group.finish();
}

fn bench_commit_and_read(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut files = FileManager::open(dir.path(), 64 << 20, 1 << 30).unwrap();
    let block = generate_block(10_000);

    c.bench_function("commit_block_10k", |b| {
        b.iter(|| files.commit_block(black_box(&block)).unwrap())
    });

    let meta = files.list()[0].clone();
    c.bench_function("read_block", |b| {
        b.iter(|| files.read_block(black_box(&meta)).unwrap())
    });
}

fn bench_store_add_query(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(
        StoreConfig::new(dir.path().join("data"))
            .with_commit_interval(Duration::from_secs(3600)),
    )
    .unwrap();

    for i in 0..10_000i64 {
        store
            .add(
                "cpu",
                Measurement::Numerical {
                    ts: 1_000_000 + i * 10,
                    value: i as f64,
                },
            )
            .unwrap();
    }

    let definition = FilterDefinition::default();
    c.bench_function("query_10k_range", |b| {
        b.iter(|| {
            store
                .query(black_box(1_000_000), black_box(2_000_000), &definition)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_block_encode,
    bench_commit_and_read,
    bench_store_add_query
);
criterion_main!(benches);
