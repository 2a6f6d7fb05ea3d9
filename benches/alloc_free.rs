// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Allocate/free latency benchmarks (spec.md §1's sub-100ns mean latency
//! target; spec.md §8 P-series properties are covered by `tests/`, not
//! here).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use epochslab::Allocator;

fn bench_alloc_free_64b(c: &mut Criterion) {
    c.bench_function("alloc_free_64b", |b| {
        let alloc = Allocator::new();
        let epoch = alloc.epoch_current();
        b.iter(|| {
            let (handle, ptr) = alloc.alloc_obj_epoch(black_box(64), epoch).unwrap();
            alloc.free_obj(handle).unwrap();
            black_box(ptr);
        });
    });
}

fn bench_alloc_free_512b(c: &mut Criterion) {
    c.bench_function("alloc_free_512b", |b| {
        let alloc = Allocator::new();
        let epoch = alloc.epoch_current();
        b.iter(|| {
            let (handle, ptr) = alloc.alloc_obj_epoch(black_box(512), epoch).unwrap();
            alloc.free_obj(handle).unwrap();
            black_box(ptr);
        });
    });
}

fn bench_slab_malloc_epoch(c: &mut Criterion) {
    c.bench_function("slab_malloc_epoch_128b", |b| {
        let alloc = Allocator::new();
        let epoch = alloc.epoch_current();
        b.iter(|| {
            let ptr = alloc.slab_malloc_epoch(black_box(128), epoch).unwrap();
            alloc.free_ptr(ptr).unwrap();
        });
    });
}

fn bench_fast_path_reuse(c: &mut Criterion) {
    // Warm a single slab up front so the measured loop only ever exercises
    // the lock-free fast path, never the slow path's mutex.
    c.bench_function("alloc_free_fast_path_only", |b| {
        let alloc = Allocator::new();
        let epoch = alloc.epoch_current();
        let (warm, _) = alloc.alloc_obj_epoch(128, epoch).unwrap();
        alloc.free_obj(warm).unwrap();
        b.iter(|| {
            let (handle, ptr) = alloc.alloc_obj_epoch(black_box(128), epoch).unwrap();
            alloc.free_obj(handle).unwrap();
            black_box(ptr);
        });
    });
}

criterion_group!(
    alloc_free_benches,
    bench_alloc_free_64b,
    bench_alloc_free_512b,
    bench_slab_malloc_epoch,
    bench_fast_path_reuse
);
criterion_main!(alloc_free_benches);
