// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Seed scenario 6 (spec.md §8): RSS delta around `epoch_close`, P6/P7.

use epochslab::Allocator;

#[test]
fn epoch_close_reports_nonzero_rss_before_and_after() {
    let alloc = Allocator::new();
    let epoch = alloc.epoch_current();

    let mut handles = Vec::new();
    for _ in 0..100 {
        let (handle, _) = alloc.alloc_obj_epoch(128, epoch).unwrap();
        handles.push(handle);
    }
    for handle in handles {
        alloc.free_obj(handle).unwrap();
    }

    alloc.epoch_advance();
    alloc.epoch_close(epoch).unwrap();

    let stats = alloc.stats_epoch(epoch);
    assert!(stats.closed);
    assert!(stats.rss_before_close > 0);
    assert!(stats.rss_after_close > 0);
}

#[test]
fn closing_an_already_closed_lane_is_a_no_op() {
    let alloc = Allocator::new();
    alloc.epoch_advance();
    alloc.epoch_close(0).unwrap();
    let before = alloc.stats_epoch(0);

    alloc.epoch_close(0).unwrap();
    let after = alloc.stats_epoch(0);

    assert_eq!(before.rss_before_close, after.rss_before_close);
    assert_eq!(before.rss_after_close, after.rss_after_close);
}
