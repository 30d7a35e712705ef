//! File I/O benchmarks for `FileChannel` positional reads.
//!
//! Measures concurrent read throughput scaling: 1, 4, 8 and 16 readers each
//! read distinct blocks, and wall-clock time should stay close to the single
//! reader case.

#![allow(clippy::expect_used, missing_docs)]

use std::{hint::black_box, sync::Arc};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use graphvault_store::{BlockChannel, DEFAULT_BLOCK_SIZE, FileChannel};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

/// Create a `FileChannel` with `block_count` pre-written blocks of distinct data.
fn create_populated_channel(block_count: u64) -> (TempDir, Arc<FileChannel>) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("bench.gv");
    let channel = FileChannel::create(&path, DEFAULT_BLOCK_SIZE).expect("create");
    let block_size = channel.block_size();

    channel.extend(block_count).expect("extend");
    for block_id in 0..block_count {
        let mut data = vec![(block_id & 0xFF) as u8; block_size];
        data[0] = 0xBE;
        data[1] = (block_id >> 8) as u8;
        channel.write_block(block_id, &data).expect("write_block");
    }
    channel.sync().expect("sync");

    (dir, Arc::new(channel))
}

// =============================================================================
// Concurrent Read Throughput
// =============================================================================

/// Benchmark: concurrent `read_block()` calls on different blocks.
fn bench_concurrent_read_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_io/concurrent_reads");
    let (_dir, channel) = create_populated_channel(64);

    for thread_count in [1, 4, 8, 16] {
        group.bench_with_input(
            BenchmarkId::new("readers", thread_count),
            &thread_count,
            |b, &threads| {
                b.iter(|| {
                    let mut handles = Vec::with_capacity(threads);
                    for t in 0..threads {
                        let channel = Arc::clone(&channel);
                        let block_id = (t as u64) % 64;
                        handles.push(std::thread::spawn(move || {
                            // Amortize thread spawn overhead.
                            for _ in 0..100 {
                                let data = channel.read_block(block_id).expect("read");
                                black_box(&data);
                            }
                        }));
                    }
                    for h in handles {
                        h.join().expect("join");
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark: single-threaded read_block throughput baseline.
fn bench_single_read_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_io/single_read");
    let (_dir, channel) = create_populated_channel(64);

    group.bench_function("read_block_4k", |b| {
        b.iter(|| {
            for block_id in 0..64 {
                let data = channel.read_block(block_id).expect("read");
                black_box(&data);
            }
        });
    });
    group.finish();
}

/// Benchmark: write then sync, the cost paid by every durable commit.
fn bench_write_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_io/write_sync");
    let (_dir, channel) = create_populated_channel(64);
    let data = vec![0x5A; channel.block_size()];

    group.bench_function("eight_blocks", |b| {
        b.iter(|| {
            for block_id in 1..9 {
                channel.write_block(block_id, &data).expect("write");
            }
            channel.sync().expect("sync");
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_concurrent_read_scaling,
    bench_single_read_throughput,
    bench_write_sync
);
criterion_main!(benches);
