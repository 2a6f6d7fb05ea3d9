// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Seed scenario 4 (spec.md §8): stale-handle detection across a forced
//! slab recycle (P4).

use epochslab::{Allocator, AllocatorConfig, FreeError};

#[test]
fn freeing_a_handle_after_its_slab_recycled_is_rejected() {
    // A single size class with a tiny cache keeps the scenario small:
    // freeing the only live object empties the slab straight into the
    // cache, and the very next allocation recycles it (version bump).
    let cfg = AllocatorConfig {
        size_classes: vec![64],
        empty_cache_capacity: 1,
        ..AllocatorConfig::default()
    };
    let alloc = Allocator::with_config(cfg).unwrap();
    let epoch = alloc.epoch_current();

    let (stale, _) = alloc.alloc_obj_epoch(64, epoch).unwrap();
    alloc.free_obj(stale).unwrap(); // slab empties, enters the cache

    // Force the recycle: the next allocation for this class pops the
    // cached slab and bumps its version, invalidating `stale`.
    let (fresh, ptr) = alloc.alloc_obj_epoch(64, epoch).unwrap();
    assert_ne!(stale.slab_version(), fresh.slab_version());
    // SAFETY: ptr is a freshly returned, valid 64-byte-class slot.
    unsafe { ptr.as_ptr().write(0x42) };

    assert_eq!(alloc.free_obj(stale).unwrap_err(), FreeError::InvalidHandle);

    // The live occupant's data and slot are untouched by the rejected free.
    assert_eq!(unsafe { ptr.as_ptr().read() }, 0x42);
    alloc.free_obj(fresh).unwrap();
}
