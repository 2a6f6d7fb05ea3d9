// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Per-size-class counters.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one size class's counters (spec.md §4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassStats {
    pub slow_path_hits: u64,
    pub new_slab_count: u64,
    pub partial_to_full: u64,
    pub full_to_partial: u64,
    pub fast_path_null: u64,
    pub fast_path_full: u64,
    pub cache_recycled: u64,
    pub cache_overflow: u64,
    pub bitmap_cas_retries: u64,
}

/// Live, atomically-updated counters for one size class.
///
/// Each field is independently `CachePadded` because different fast/slow
/// paths increment different counters from different threads concurrently
/// — without padding, false sharing between e.g. `fast_path_null` (hot,
/// per-allocation) and `new_slab_count` (cold, slow path) would serialize
/// otherwise-independent cache lines.
#[derive(Default)]
pub struct ClassCounters {
    slow_path_hits: CachePadded<AtomicU64>,
    new_slab_count: CachePadded<AtomicU64>,
    partial_to_full: CachePadded<AtomicU64>,
    full_to_partial: CachePadded<AtomicU64>,
    fast_path_null: CachePadded<AtomicU64>,
    fast_path_full: CachePadded<AtomicU64>,
    cache_recycled: CachePadded<AtomicU64>,
    cache_overflow: CachePadded<AtomicU64>,
    bitmap_cas_retries: CachePadded<AtomicU64>,
}

impl ClassCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_slow_path_hit(&self) {
        self.slow_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_new_slab(&self) {
        self.new_slab_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_partial_to_full(&self) {
        self.partial_to_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_full_to_partial(&self) {
        self.full_to_partial.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fast_path_null(&self) {
        self.fast_path_null.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fast_path_full(&self) {
        self.fast_path_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_recycled(&self) {
        self.cache_recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_overflow(&self) {
        self.cache_overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold in the CAS-retry tally from one `Slab::try_acquire`/`release`
    /// call (spec.md §4.1, §4.6).
    pub fn add_bitmap_cas_retries(&self, n: u32) {
        if n > 0 {
            self.bitmap_cas_retries.fetch_add(u64::from(n), Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ClassStats {
        ClassStats {
            slow_path_hits: self.slow_path_hits.load(Ordering::Relaxed),
            new_slab_count: self.new_slab_count.load(Ordering::Relaxed),
            partial_to_full: self.partial_to_full.load(Ordering::Relaxed),
            full_to_partial: self.full_to_partial.load(Ordering::Relaxed),
            fast_path_null: self.fast_path_null.load(Ordering::Relaxed),
            fast_path_full: self.fast_path_full.load(Ordering::Relaxed),
            cache_recycled: self.cache_recycled.load(Ordering::Relaxed),
            cache_overflow: self.cache_overflow.load(Ordering::Relaxed),
            bitmap_cas_retries: self.bitmap_cas_retries.load(Ordering::Relaxed),
        }
    }
}
