// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Seed scenario 3 (spec.md §8): epoch ring wraparound, P5 monotonicity.

use epochslab::Allocator;

#[test]
fn twenty_advances_wrap_a_sixteen_lane_ring_with_strictly_increasing_era() {
    let alloc = Allocator::new(); // EPOCH_COUNT = 16 by default
    let mut last_era = 0;
    for _ in 0..20 {
        let era = alloc.epoch_advance();
        assert!(era > last_era, "era must strictly increase across advances");
        last_era = era;
    }
    assert_eq!(last_era, 20, "epoch_era_counter == 20 after 20 advances");
}
