#![allow(missing_docs)]

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use mat5::{Array, Compression, Mat5, MatFile, NumericArray, default_allocator};
use std::hint::black_box;

const ENTRY_COUNT: usize = 64;
const ENTRY_LEN: usize = 16_384;

fn generate_file() -> MatFile {
    let alloc = default_allocator();
    let mut file = MatFile::new();
    for i in 0..ENTRY_COUNT {
        let values: Vec<f64> = (0..ENTRY_LEN).map(|v| ((v * (i + 1)) % 977) as f64 * 0.5).collect();
        let array = NumericArray::from_f64(vec![ENTRY_LEN, 1], &values, &alloc)
            .expect("Failed to build array");
        file.insert(format!("entry_{i}"), Array::Numeric(array));
    }
    file
}

// --- BENCHMARKS ---

fn bench_writers(c: &mut Criterion) {
    let file = generate_file();

    println!("Writers entry count: {ENTRY_COUNT}");

    let mut group = c.benchmark_group("Compressed Write");
    group.throughput(Throughput::Bytes((ENTRY_COUNT * ENTRY_LEN * 8) as u64));

    // 1. Baseline: uncompressed
    group.bench_function("write_raw", |b| {
        b.iter(|| Mat5::to_bytes(black_box(&file)).expect("Failed to write"));
    });

    // 2. Deflate on the calling thread
    let sequential = Mat5::builder().compression(Compression::deflate());
    group.bench_function("write_deflate_sequential", |b| {
        b.iter(|| sequential.to_bytes(black_box(&file)).expect("Failed to write"));
    });

    // 3. Deflate on a pool
    let pooled = Mat5::builder()
        .compression(Compression::deflate())
        .pool(rayon::ThreadPoolBuilder::new().build().map(std::sync::Arc::new).expect("pool"));
    group.bench_function("write_deflate_pooled", |b| {
        b.iter(|| pooled.to_bytes(black_box(&file)).expect("Failed to write"));
    });

    group.finish();
}

fn bench_readers(c: &mut Criterion) {
    let file = generate_file();
    let bytes = Mat5::builder()
        .compression(Compression::deflate())
        .to_bytes(&file)
        .expect("Failed to write");

    println!("Readers input size: {} bytes", bytes.len());

    let mut group = c.benchmark_group("Compressed Read");
    group.throughput(Throughput::Bytes((ENTRY_COUNT * ENTRY_LEN * 8) as u64));

    // 1. Sequential inflate
    group.bench_function("read_sequential", |b| {
        b.iter(|| Mat5::read_bytes(black_box(bytes.clone())).expect("Failed to read"));
    });

    // 2. Pooled inflate
    let pooled = Mat5::builder()
        .pool(rayon::ThreadPoolBuilder::new().build().map(std::sync::Arc::new).expect("pool"));
    group.bench_function("read_pooled", |b| {
        b.iter(|| pooled.read_bytes(black_box(bytes.clone())).expect("Failed to read"));
    });

    // 3. Forward-only stream
    group.bench_function("read_stream", |b| {
        b.iter(|| Mat5::read_from(black_box(bytes.as_slice())).expect("Failed to read"));
    });

    group.finish();
}

criterion_group!(benches, bench_writers, bench_readers);
criterion_main!(benches);
