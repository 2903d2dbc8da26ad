//! Performance benchmarks for gembo
//!
//! Run with: cargo bench --package gembo-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gembo_core::{AccessMode, BoManager, CreateFlags, Domains, ShmDevice};
use std::sync::Arc;
use std::time::SystemTime;

fn unique_namespace() -> String {
    let ts = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("/gembo_bench_{}", ts)
}

fn manager() -> BoManager {
    BoManager::new(Arc::new(ShmDevice::new(&unique_namespace())))
}

fn bench_create_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_release");
    group.sample_size(50);

    for size in [4096u64, 65536, 1048576].iter() {
        group.throughput(Throughput::Bytes(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let manager = manager();
            b.iter(|| {
                let bo = manager
                    .create(size, 4096, Domains::GTT, CreateFlags::empty())
                    .unwrap();
                black_box(bo.release());
            });
        });
    }
    group.finish();
}

fn bench_ref_count_ops(c: &mut Criterion) {
    let manager = manager();
    let bo = manager
        .create(4096, 4096, Domains::GTT, CreateFlags::empty())
        .unwrap();

    c.bench_function("acquire_release", |b| {
        b.iter(|| {
            let r = bo.acquire();
            black_box(r.release());
        });
    });
}

fn bench_map(c: &mut Criterion) {
    let manager = manager();
    let bo = manager
        .create(65536, 4096, Domains::GTT, CreateFlags::empty())
        .unwrap();

    let mut group = c.benchmark_group("map");

    group.bench_function("first_map", |b| {
        b.iter(|| {
            bo.map(true).unwrap();
            bo.unmap();
        });
    });

    bo.map(false).unwrap();
    group.bench_function("nested_map", |b| {
        b.iter(|| {
            bo.map(false).unwrap();
            bo.unmap();
        });
    });
    bo.unmap();

    group.finish();
}

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_read");
    group.sample_size(50);

    for size in [4096usize, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let manager = manager();
            let bo = manager
                .create(size as u64, 4096, Domains::GTT, CreateFlags::empty())
                .unwrap();
            let data = vec![42u8; size];

            b.iter(|| {
                let mut guard = bo.mapping(AccessMode::ReadWrite).unwrap();
                let slice = unsafe { guard.as_mut_slice() }.unwrap();
                slice.copy_from_slice(&data);
                let sum: u64 = slice.iter().map(|&x| x as u64).sum();
                black_box(sum);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_create_release,
    bench_ref_count_ops,
    bench_map,
    bench_write_read
);
criterion_main!(benches);
