// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Epoch ring: a fixed power-of-two ring of lanes, each stamped with a
//! monotonic era on `advance`, that lets the allocator reclaim an entire
//! temporal phase's slabs without scanning live objects.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::error::EpochError;

/// Snapshot of one lane's telemetry (spec.md §4.6, "Per epoch lane").
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochStats {
    pub era: u64,
    pub allocations: u64,
    pub frees: u64,
    pub rss_before_close: u64,
    pub rss_after_close: u64,
    pub closed: bool,
}

struct Lane {
    era: CachePadded<AtomicU64>,
    allocations: CachePadded<AtomicU64>,
    frees: CachePadded<AtomicU64>,
    rss_before_close: AtomicU64,
    rss_after_close: AtomicU64,
    closed: AtomicBool,
}

impl Lane {
    fn new() -> Self {
        Self {
            era: CachePadded::new(AtomicU64::new(0)),
            allocations: CachePadded::new(AtomicU64::new(0)),
            frees: CachePadded::new(AtomicU64::new(0)),
            rss_before_close: AtomicU64::new(0),
            rss_after_close: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn reset_for_reuse(&self, era: u64) {
        self.era.store(era, Ordering::Release);
        self.allocations.store(0, Ordering::Relaxed);
        self.frees.store(0, Ordering::Relaxed);
        self.rss_before_close.store(0, Ordering::Relaxed);
        self.rss_after_close.store(0, Ordering::Relaxed);
        self.closed.store(false, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EpochStats {
        EpochStats {
            era: self.era.load(Ordering::Acquire),
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            rss_before_close: self.rss_before_close.load(Ordering::Relaxed),
            rss_after_close: self.rss_after_close.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

/// A fixed ring of `epoch_count` lanes (I5: the era counter is strictly
/// monotonic).
pub struct EpochRing {
    lanes: Box<[Lane]>,
    mask: usize,
    current: AtomicUsize,
    era_counter: AtomicU64,
}

impl EpochRing {
    /// `epoch_count` must be a power of two — validated by
    /// [`crate::config::AllocatorConfig::validate`] before this is built.
    pub fn new(epoch_count: usize) -> Self {
        let lanes: Vec<Lane> = (0..epoch_count).map(|_| Lane::new()).collect();
        Self {
            lanes: lanes.into_boxed_slice(),
            mask: epoch_count - 1,
            current: AtomicUsize::new(0),
            era_counter: AtomicU64::new(0),
        }
    }

    pub fn epoch_count(&self) -> usize {
        self.lanes.len()
    }

    /// Id of the currently active lane.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Era stamped on a given lane.
    pub fn era_of(&self, epoch: usize) -> u64 {
        self.lanes[epoch].era.load(Ordering::Acquire)
    }

    /// Advance to the next lane (`(current + 1) mod epoch_count`), stamping
    /// it with a freshly incremented era. Returns the new era (P5:
    /// strictly increasing across any sequence of calls).
    pub fn advance(&self) -> u64 {
        let new_era = self.era_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let cur = self.current.load(Ordering::Acquire);
        let next = (cur + 1) & self.mask;
        self.lanes[next].reset_for_reuse(new_era);
        self.current.store(next, Ordering::Release);
        new_era
    }

    /// Total number of `advance` calls observed so far (the raw era
    /// counter, independent of any particular lane).
    pub fn era_counter(&self) -> u64 {
        self.era_counter.load(Ordering::Acquire)
    }

    pub fn record_alloc(&self, epoch: usize) {
        self.lanes[epoch].allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_free(&self, epoch: usize) {
        self.lanes[epoch].frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Validate `epoch` is in range and not the current lane (required
    /// before a caller starts draining its size-class caches).
    pub fn check_closeable(&self, epoch: usize) -> Result<(), EpochError> {
        if epoch >= self.lanes.len() {
            return Err(EpochError::OutOfRange(epoch as u32));
        }
        if epoch == self.current() {
            return Err(EpochError::CurrentEpoch(epoch as u32));
        }
        Ok(())
    }

    /// True if this lane has already been closed (P7: closing it again is
    /// a no-op).
    pub fn is_closed(&self, epoch: usize) -> bool {
        self.lanes[epoch].closed.load(Ordering::Relaxed)
    }

    /// Record the RSS-before/after pair and mark the lane closed. Callers
    /// must have already checked `check_closeable` and `!is_closed`.
    pub fn record_close(&self, epoch: usize, rss_before: u64, rss_after: u64) {
        let lane = &self.lanes[epoch];
        lane.rss_before_close.store(rss_before, Ordering::Relaxed);
        lane.rss_after_close.store(rss_after, Ordering::Relaxed);
        lane.closed.store(true, Ordering::Release);
    }

    pub fn stats(&self, epoch: usize) -> EpochStats {
        self.lanes[epoch].snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_strictly_monotonic() {
        let ring = EpochRing::new(16);
        let mut last = 0;
        for _ in 0..20 {
            let era = ring.advance();
            assert!(era > last);
            last = era;
        }
        assert_eq!(ring.era_counter(), 20);
    }

    #[test]
    fn ring_wraps_and_current_tracks_mod_count() {
        let ring = EpochRing::new(4);
        for expected in [1, 2, 3, 0, 1] {
            ring.advance();
            assert_eq!(ring.current(), expected);
        }
    }

    #[test]
    fn close_rejects_current_and_out_of_range() {
        let ring = EpochRing::new(4);
        assert_eq!(
            ring.check_closeable(0),
            Err(EpochError::CurrentEpoch(0))
        );
        assert_eq!(ring.check_closeable(9), Err(EpochError::OutOfRange(9)));
        ring.advance();
        assert!(ring.check_closeable(0).is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let ring = EpochRing::new(4);
        ring.advance();
        ring.record_close(0, 100, 80);
        assert!(ring.is_closed(0));
        let before = ring.stats(0);
        // A second close attempt (caller-side no-op check) leaves stats untouched.
        assert!(ring.is_closed(0));
        let after = ring.stats(0);
        assert_eq!(before.rss_before_close, after.rss_before_close);
        assert_eq!(before.rss_after_close, after.rss_after_close);
    }
}
