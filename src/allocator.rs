// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Allocator root — the crate's public entry point (spec.md §6 "External
//! interfaces"). Owns a fixed array of size-class engines, the epoch ring,
//! and the host page primitive both depend on.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::{AllocatorConfig, SLAB_MAGIC};
use crate::core::epoch::{EpochRing, EpochStats};
use crate::core::handle::Handle;
use crate::core::host::{MmapPagePrimitive, PagePrimitive};
use crate::core::size_class::SizeClassEngine;
use crate::core::slab::Slab;
use crate::error::{AllocError, ConfigError, EpochError, FreeError};
use crate::logging::{log_debug, log_error};
use crate::telemetry::ClassStats;

/// Distinguishes handles minted by different `Allocator` instances; a
/// process may host several (spec.md §9 "Global state").
static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(1);

/// The allocator root (spec.md §3 "Allocator root", §6 `create`/`destroy`).
///
/// `Allocator` has no `Clone`; share it behind an `Arc` across threads —
/// every operation takes `&self` and is internally synchronized the way
/// spec.md §5 describes.
pub struct Allocator {
    id: u32,
    config: AllocatorConfig,
    classes: Vec<SizeClassEngine>,
    epochs: EpochRing,
    host: Box<dyn PagePrimitive>,
}

impl Allocator {
    /// Build an allocator with the default configuration (`SLAB_PAGE_SIZE`,
    /// `EPOCH_COUNT`, `DEFAULT_SIZE_CLASSES`, `EMPTY_CACHE_CAPACITY`).
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default()).expect("default config always validates")
    }

    /// Build an allocator with a caller-supplied configuration, validated
    /// up front (SPEC_FULL.md §12 Level 2).
    pub fn with_config(config: AllocatorConfig) -> Result<Self, ConfigError> {
        Self::with_host(config, Box::new(MmapPagePrimitive::new()))
    }

    /// Build an allocator over an arbitrary [`PagePrimitive`] — the test
    /// injection point for a counting fake (SPEC_FULL.md §6a).
    pub fn with_host(
        config: AllocatorConfig,
        host: Box<dyn PagePrimitive>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let id = NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed);
        let classes = config
            .size_classes
            .iter()
            .enumerate()
            .map(|(idx, &object_size)| {
                SizeClassEngine::new(idx as u8, object_size, config.page_size, config.empty_cache_capacity)
            })
            .collect();
        let epochs = EpochRing::new(config.epoch_count);
        log_debug!(
            "epochslab: allocator {id} created ({} size classes, {}B pages, {} epoch lanes)",
            config.size_classes.len(),
            config.page_size,
            config.epoch_count
        );
        Ok(Self {
            id,
            config,
            classes,
            epochs,
            host,
        })
    }

    /// Select the smallest size class that fits `size` (smallest-fit per
    /// spec.md §6).
    pub fn size_class_for(&self, size: usize) -> Result<u8, AllocError> {
        self.config
            .size_classes
            .iter()
            .position(|&class| size <= class)
            .map(|idx| idx as u8)
            .ok_or(AllocError::NoSizeClass {
                requested: size,
                largest: self.config.largest_class(),
            })
    }

    /// `epoch` is taken modulo the ring size rather than rejected, matching
    /// `epoch_advance`'s own `(current + 1) mod EPOCH_COUNT` wraparound —
    /// any lane id a caller can observe via `epoch_current` is always
    /// in-range, so this only matters for a caller-constructed out-of-range
    /// value.
    fn lane_of(&self, epoch: usize) -> usize {
        epoch % self.epochs.epoch_count()
    }

    /// Allocate one object of `size`, stamped with `epoch`'s current era
    /// (spec.md §6 `alloc_obj_epoch`).
    pub fn alloc_obj_epoch(&self, size: usize, epoch: usize) -> Result<(Handle, NonNull<u8>), AllocError> {
        let class = self.size_class_for(size)?;
        let lane = self.lane_of(epoch);
        let era = self.epochs.era_of(lane);
        let engine = &self.classes[class as usize];
        let (slab_ptr, slot) = engine.alloc(self.host.as_ref(), era)?;
        // SAFETY: `slab_ptr` was just returned live by `engine.alloc`
        // (see that method's own safety note).
        let slab = unsafe { &*slab_ptr };
        // SAFETY: `slot` is in-bounds (engine.alloc only ever returns an
        // in-bounds slot index) and `slab` is mapped: it was either just
        // returned from the lock-free fast path (never unmapped while
        // reachable there) or freshly mapped/remapped on the slow path
        // before being published.
        let ptr = unsafe { slab.slot_ptr(slot) };
        let handle = Handle::new(slab_ptr as u64, slot as u32, class, slab.version(), self.id);
        self.epochs.record_alloc(lane);
        Ok((handle, ptr))
    }

    /// Handle-less convenience allocation (spec.md §6
    /// `slab_malloc_epoch`); free the returned pointer with
    /// [`Allocator::free_ptr`].
    pub fn slab_malloc_epoch(&self, size: usize, epoch: usize) -> Result<NonNull<u8>, AllocError> {
        self.alloc_obj_epoch(size, epoch).map(|(_, ptr)| ptr)
    }

    /// Resolve `handle` to its live slab/slot, or reject it (spec.md §4.5).
    /// Returns a raw slab pointer rather than a reference, since the
    /// borrow must not outlive the lock-free `free` call that follows.
    fn validate(&self, handle: &Handle) -> Result<(*const Slab, usize), FreeError> {
        if handle.allocator_id() != self.id {
            return Err(FreeError::InvalidHandle);
        }
        let class = handle.size_class() as usize;
        if class >= self.classes.len() {
            return Err(FreeError::InvalidHandle);
        }
        // SAFETY: `allocator_id` just matched this instance, so the
        // address names a slab header minted by `map_new_slab` under this
        // allocator; such headers are never deallocated while it lives
        // (see `core::slab::Slab`'s module doc), so dereferencing it here
        // is sound regardless of whether the slab is currently mapped.
        let slab_ptr = handle.slab_addr() as *const Slab;
        let slab = unsafe { &*slab_ptr };
        if slab.magic() != SLAB_MAGIC
            || !slab.is_mapped()
            || slab.version() != handle.slab_version()
            || slab.size_class() != handle.size_class()
            || handle.slot() as usize >= slab.object_count()
        {
            return Err(FreeError::InvalidHandle);
        }
        Ok((slab_ptr, handle.slot() as usize))
    }

    /// Free `handle` (spec.md §6 `free_obj`). A rejected handle never
    /// writes memory (§4.5, I4).
    pub fn free_obj(&self, handle: Handle) -> Result<(), FreeError> {
        let (slab_ptr, slot) = self.validate(&handle)?;
        let engine = &self.classes[handle.size_class() as usize];
        // SAFETY: `validate` just confirmed `slab_ptr` is live and mapped.
        unsafe { engine.free(slab_ptr, slot) }.map_err(|()| {
            log_error!("epochslab: double free rejected (slab {slab_ptr:p}, slot {slot})");
            FreeError::DoubleFree
        })?;
        // Handles don't carry the epoch they were allocated in (spec.md
        // §3 defines the tuple as `{slab, slot, size_class, version}`), so
        // the free is attributed to whichever lane is current now. This
        // only affects the per-lane allocations/frees telemetry counters,
        // never correctness.
        self.epochs.record_free(self.epochs.current());
        Ok(())
    }

    /// Free a pointer previously returned by
    /// [`Allocator::slab_malloc_epoch`], recovering its slab in O(1) via
    /// page alignment (spec.md §6, §9 open question 3).
    pub fn free_ptr(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        // SAFETY: the caller is assumed to pass a pointer this allocator
        // itself returned; its backing page carries the back-pointer stub
        // written at construction/remap time.
        let header = unsafe { Slab::header_from_page_ptr(ptr.as_ptr(), self.config.page_size) };
        if header.is_null() {
            return Err(FreeError::InvalidHandle);
        }
        // SAFETY: see `validate` — headers reachable this way were minted
        // by this process and never deallocated while it lives. We cannot
        // check `allocator_id` here (no handle to carry one), matching
        // spec.md's pointer-only contract.
        let slab = unsafe { &*header };
        if slab.magic() != SLAB_MAGIC || !slab.is_mapped() {
            return Err(FreeError::InvalidHandle);
        }
        let page_base = (ptr.as_ptr() as usize) & !(self.config.page_size - 1);
        let object_size = slab.object_size();
        let offset = (ptr.as_ptr() as usize) - page_base;
        if offset < object_size {
            // Falls inside the reserved back-pointer-stub region.
            return Err(FreeError::InvalidHandle);
        }
        let slot = offset / object_size - 1;
        if slot >= slab.object_count() {
            return Err(FreeError::InvalidHandle);
        }
        let engine = &self.classes[slab.size_class() as usize];
        // SAFETY: `header` is live and mapped (checked above).
        unsafe { engine.free(header, slot) }.map_err(|()| {
            log_error!("epochslab: double free rejected (slab {header:p}, slot {slot})");
            FreeError::DoubleFree
        })?;
        self.epochs.record_free(self.epochs.current());
        Ok(())
    }

    /// Active lane id (spec.md §6 `epoch_current`).
    pub fn epoch_current(&self) -> usize {
        self.epochs.current()
    }

    /// Advance to the next lane, stamping it with a fresh era (spec.md §6
    /// `epoch_advance`, §4.4). Returns the new era.
    pub fn epoch_advance(&self) -> u64 {
        let era = self.epochs.advance();
        log_debug!("epochslab: epoch advanced to lane {} (era {era})", self.epochs.current());
        era
    }

    /// Reclaim a lane (spec.md §6 `epoch_close`, §4.4). Rejects closing
    /// the current lane or an out-of-range one (§7 `InvalidEpoch`);
    /// closing an already-closed lane is a no-op (P7).
    pub fn epoch_close(&self, epoch: usize) -> Result<(), EpochError> {
        self.epochs.check_closeable(epoch)?;
        if self.epochs.is_closed(epoch) {
            return Ok(());
        }
        let era = self.epochs.era_of(epoch);
        let rss_before = self.host.resident_set_bytes();
        let mut unmapped_total = 0;
        for engine in &self.classes {
            unmapped_total += engine.drain_cache_for_close(self.host.as_ref(), era, usize::MAX);
        }
        let rss_after = self.host.resident_set_bytes();
        self.epochs.record_close(epoch, rss_before as u64, rss_after as u64);
        log_debug!(
            "epochslab: epoch {epoch} closed (era {era}, {unmapped_total} pages unmapped, rss {rss_before} -> {rss_after})"
        );
        Ok(())
    }

    /// Snapshot of one lane's telemetry (spec.md §6 `stats_epoch`).
    pub fn stats_epoch(&self, epoch: usize) -> EpochStats {
        self.epochs.stats(epoch)
    }

    /// Snapshot of one size class's telemetry (spec.md §6 `stats_class`).
    pub fn stats_class(&self, class: u8) -> ClassStats {
        self.classes[class as usize].stats()
    }

    /// Number of configured size classes.
    pub fn size_class_count(&self) -> usize {
        self.classes.len()
    }

    /// `(partial_list_len, full_list_len, cache_len)` for one size class —
    /// a diagnostic/test probe for P2 (list membership), not used on any
    /// allocation path.
    pub fn class_list_lengths(&self, class: u8) -> (usize, usize, usize) {
        let engine = &self.classes[class as usize];
        let (partial, full) = engine.list_lengths();
        (partial, full, engine.cache_len())
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        log_debug!("epochslab: allocator {} destroyed", self.id);
        // spec.md §6 `destroy`: guaranteed release of all backing pages.
        for engine in &mut self.classes {
            engine.teardown(self.host.as_ref());
        }
    }
}
