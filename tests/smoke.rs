// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Seed scenario 1 (spec.md §8): single-thread smoke test.

use epochslab::Allocator;

#[test]
fn alloc_ten_write_free_all_leaves_tidy_lists() {
    let alloc = Allocator::new();
    let epoch = alloc.epoch_current();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let (handle, ptr) = alloc.alloc_obj_epoch(128, epoch).unwrap();
        // SAFETY: ptr is a freshly returned, valid 128-byte-class slot.
        unsafe { ptr.as_ptr().write(0xAA) };
        handles.push(handle);
    }

    for handle in handles {
        alloc.free_obj(handle).unwrap();
    }

    let class = alloc.size_class_for(128).unwrap();
    let (partial_len, full_len, _cache_len) = alloc.class_list_lengths(class);
    assert!(partial_len <= 1);
    assert_eq!(full_len, 0);
    // cache_len is a usize: "≥ 0" always holds, nothing further to assert.
}
