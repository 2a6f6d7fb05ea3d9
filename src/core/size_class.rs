// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Size-class engine: owns the partial/full intrusive lists, the
//! `current_partial` fast-path pointer, and the empty-slab cache for one
//! fixed object size (spec.md §4.2).
//!
//! Slabs move between three owners over their lifetime: the empty-slab
//! cache (owns a `Box<Slab>` directly), the partial/full intrusive lists
//! (own a slab via a raw `*mut Slab` obtained from `Box::into_raw`, linked
//! through `Slab::links()`), and back. All list/ownership transitions
//! happen while `lists` is locked.

use parking_lot::Mutex;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::core::cache::EmptyCache;
use crate::core::host::PagePrimitive;
use crate::core::slab::{map_new_slab, ListId, Slab, Transition};
use crate::error::AllocError;
use crate::logging::{log_debug, log_error, log_warn};
use crate::telemetry::{ClassCounters, ClassStats};

struct Lists {
    partial_head: *mut Slab,
    full_head: *mut Slab,
}

// SAFETY: raw pointers here name heap-allocated `Slab`s exclusively owned
// by whichever list currently holds them; all access is under the
// `SizeClassEngine`'s `lists` mutex.
unsafe impl Send for Lists {}

/// Unlink `node` from the list rooted at `*head`. Caller holds the mutex.
unsafe fn list_unlink(head: &mut *mut Slab, node: *mut Slab) {
    // SAFETY: node is a live, list-owned slab; caller holds the list mutex.
    let links = unsafe { (*node).links() };
    let prev = links.prev;
    let next = links.next;
    match prev {
        Some(p) => unsafe { (*p.as_ptr()).links() }.next = next,
        None => *head = next.map_or(ptr::null_mut(), |n| n.as_ptr()),
    }
    if let Some(n) = next {
        unsafe { (*n.as_ptr()).links() }.prev = prev;
    }
    let links = unsafe { (*node).links() };
    links.prev = None;
    links.next = None;
}

/// Push `node` onto the front of the list rooted at `*head` (LIFO).
/// Caller holds the mutex.
unsafe fn list_push_front(head: &mut *mut Slab, node: *mut Slab) {
    let old_head = *head;
    // SAFETY: node is exclusively owned by this call; caller holds the
    // list mutex.
    let links = unsafe { (*node).links() };
    links.prev = None;
    links.next = std::ptr::NonNull::new(old_head);
    if let Some(old) = std::ptr::NonNull::new(old_head) {
        unsafe { (*old.as_ptr()).links() }.prev = std::ptr::NonNull::new(node);
    }
    *head = node;
}

/// Pop the head of the list rooted at `*head`. Caller holds the mutex.
unsafe fn list_pop_front(head: &mut *mut Slab) -> *mut Slab {
    let node = *head;
    if node.is_null() {
        return ptr::null_mut();
    }
    unsafe { list_unlink(head, node) };
    node
}

/// Per-size-class state (spec.md §3 "Size class").
pub struct SizeClassEngine {
    size_class: u8,
    object_size: usize,
    page_size: usize,
    next_slab_id: AtomicU32,
    current_partial: AtomicPtr<Slab>,
    lists: Mutex<Lists>,
    cache: EmptyCache,
    counters: ClassCounters,
}

impl SizeClassEngine {
    pub fn new(size_class: u8, object_size: usize, page_size: usize, cache_capacity: usize) -> Self {
        Self {
            size_class,
            object_size,
            page_size,
            next_slab_id: AtomicU32::new(1),
            current_partial: AtomicPtr::new(ptr::null_mut()),
            lists: Mutex::new(Lists {
                partial_head: ptr::null_mut(),
                full_head: ptr::null_mut(),
            }),
            cache: EmptyCache::new(cache_capacity),
        }
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn stats(&self) -> ClassStats {
        self.counters.snapshot()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Walk the partial/full lists and count their members (P2 test/
    /// diagnostic probe; not on any allocation path — O(n) under the list
    /// mutex).
    pub fn list_lengths(&self) -> (usize, usize) {
        let lists = self.lists.lock();
        let count = |mut node: *mut Slab| {
            let mut n = 0;
            while !node.is_null() {
                n += 1;
                // SAFETY: we hold the list mutex; node is list-owned.
                node = unsafe { (*node).links() }
                    .next
                    .map_or(ptr::null_mut(), |p| p.as_ptr());
            }
            n
        };
        (count(lists.partial_head), count(lists.full_head))
    }

    /// Allocate one slot, stamping the slab (if freshly created) with
    /// `era`. Returns the owning slab pointer and slot index.
    ///
    /// # Safety
    /// The returned `*const Slab` is valid for the lifetime of the
    /// allocator that owns this engine — slabs are only ever freed via
    /// `epoch_close`'s cache drain, never while reachable from a live
    /// handle.
    pub fn alloc(
        &self,
        host: &dyn PagePrimitive,
        era: u64,
    ) -> Result<(*const Slab, usize), AllocError> {
        loop {
            // Fast path: current_partial is a weak hint, may be null or
            // stale (I3). Dereferencing it without holding the list mutex
            // is the one accepted lock-free hazard in this design: a slab
            // is only ever physically unmapped from the empty-slab cache
            // during `epoch_close`, never while it is reachable from
            // `current_partial` or a list, so the pointer stays valid
            // memory even when stale.
            let cur = self.current_partial.load(Ordering::Acquire);
            if !cur.is_null() {
                // SAFETY: see above — cur names a slab that has not been
                // unmapped.
                let slab = unsafe { &*cur };
                if let Some((slot, prior, retries)) = slab.try_acquire() {
                    self.counters.add_bitmap_cas_retries(retries);
                    if slab.acquire_transition(prior) == Transition::BecameFull {
                        self.handle_became_full(cur);
                    }
                    return Ok((cur, slot));
                }
                self.counters.inc_fast_path_full();
            } else {
                self.counters.inc_fast_path_null();
            }

            self.slow_path_alloc(host, era)?;
        }
    }

    fn handle_became_full(&self, slab_ptr: *mut Slab) {
        let mut lists = self.lists.lock();
        // SAFETY: slab_ptr is a live, list-owned slab; we hold the mutex.
        let list_id = unsafe { (*slab_ptr).list_id() };
        if list_id != ListId::Partial {
            // Already moved by a racing observer.
            return;
        }
        unsafe {
            list_unlink(&mut lists.partial_head, slab_ptr);
            (*slab_ptr).set_list_id(ListId::Full);
            list_push_front(&mut lists.full_head, slab_ptr);
        }
        let _ = self.current_partial.compare_exchange(
            slab_ptr,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        self.counters.inc_partial_to_full();
    }

    /// Slow path for allocation (spec.md §4.2 "Slow path"), under the list
    /// mutex: repair `current_partial` from the partial list, the cache,
    /// or a fresh page.
    fn slow_path_alloc(&self, host: &dyn PagePrimitive, era: u64) -> Result<(), AllocError> {
        self.counters.inc_slow_path_hit();
        let mut lists = self.lists.lock();

        if !self.current_partial.load(Ordering::Acquire).is_null() {
            return Ok(()); // repaired by another thread; caller retries fast path
        }

        let popped = unsafe { list_pop_front(&mut lists.partial_head) };
        if !popped.is_null() {
            self.current_partial.store(popped, Ordering::Release);
            return Ok(());
        }
        drop(lists);

        // No partial slab: reuse from cache/overflow, else map a fresh page.
        let boxed = match self.cache.pop() {
            Some(slab) if slab.is_mapped() => {
                slab.recycle(era);
                self.counters.inc_cache_recycled();
                slab
            }
            Some(slab) => {
                // SAFETY: popped from the cache, not reachable from any
                // list or `current_partial`: exclusively owned here.
                match unsafe { slab.remap(host, era) } {
                    Ok(()) => {
                        self.counters.inc_cache_recycled();
                        slab
                    }
                    Err(e) => {
                        // Header stays alive for any handle still naming
                        // it (already-consumed handles must still hit
                        // DoubleFree, not freed memory): hand it back.
                        log_error!("epochslab: host page remap failed: {e}");
                        if self.cache.push(slab) {
                            self.counters.inc_cache_overflow();
                        }
                        return Err(AllocError::OutOfMemory);
                    }
                }
            }
            None => {
                let slab_id = self.next_slab_id.fetch_add(1, Ordering::Relaxed);
                let slab = map_new_slab(
                    host,
                    self.size_class,
                    slab_id,
                    self.object_size,
                    self.page_size,
                    era,
                )
                .map_err(|e| {
                    log_error!("epochslab: host page map failed: {e}");
                    AllocError::OutOfMemory
                })?;
                self.counters.inc_new_slab();
                log_debug!(
                    "epochslab: new slab {} (class {}, {}B)",
                    slab_id,
                    self.size_class,
                    self.object_size
                );
                slab
            }
        };

        let raw = Box::into_raw(boxed);
        let mut lists = self.lists.lock();
        // SAFETY: raw was just minted via Box::into_raw; we hold the mutex.
        unsafe {
            (*raw).set_list_id(ListId::Partial);
            list_push_front(&mut lists.partial_head, raw);
        }
        self.current_partial.store(raw, Ordering::Release);
        Ok(())
    }

    /// Release slot `index` of `slab`. `slab` must be a pointer previously
    /// returned by [`SizeClassEngine::alloc`] for this engine.
    ///
    /// # Safety
    /// `slab` must still be live (see `alloc`'s safety note).
    pub unsafe fn free(&self, slab: *const Slab, index: usize) -> Result<(), ()> {
        // SAFETY: caller guarantees `slab` is live.
        let slab_ref = unsafe { &*slab };
        let (prior, retries) = slab_ref.release(index)?;
        self.counters.add_bitmap_cas_retries(retries);
        match slab_ref.release_transition(prior) {
            Transition::LeftFull => self.handle_left_full(slab as *mut Slab),
            Transition::BecameEmpty => self.handle_became_empty(slab as *mut Slab),
            Transition::None | Transition::BecameFull => {}
        }
        Ok(())
    }

    fn handle_left_full(&self, slab_ptr: *mut Slab) {
        let mut lists = self.lists.lock();
        // SAFETY: slab_ptr is live and list-owned; we hold the mutex.
        let list_id = unsafe { (*slab_ptr).list_id() };
        if list_id != ListId::Full {
            return; // raced with a concurrent mover
        }
        unsafe {
            list_unlink(&mut lists.full_head, slab_ptr);
            (*slab_ptr).set_list_id(ListId::Partial);
            list_push_front(&mut lists.partial_head, slab_ptr);
        }
        self.counters.inc_full_to_partial();
        if self.current_partial.load(Ordering::Acquire).is_null() {
            self.current_partial.store(slab_ptr, Ordering::Release);
        }
    }

    fn handle_became_empty(&self, slab_ptr: *mut Slab) {
        let mut lists = self.lists.lock();
        // SAFETY: slab_ptr is live; we hold the mutex. A slab can only
        // reach BecameEmpty from the partial list (I2): free_count just
        // hit object_count, which means it was 0 < free_count <
        // object_count immediately before, i.e. partial.
        let slab_ref = unsafe { &*slab_ptr };
        let list_id = unsafe { (*slab_ptr).list_id() };
        if list_id != ListId::Partial {
            return;
        }
        if slab_ref.free_count() != slab_ref.object_count() {
            // A concurrent fast-path acquire claimed a slot through
            // `current_partial` in the window between the release CAS and
            // this lock: still partial, leave it where it is.
            return;
        }
        unsafe {
            list_unlink(&mut lists.partial_head, slab_ptr);
            (*slab_ptr).set_list_id(ListId::None);
        }
        let _ = self.current_partial.compare_exchange(
            slab_ptr,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        drop(lists);
        // SAFETY: slab_ptr was minted via Box::into_raw in slow_path_alloc
        // and has just been fully unlinked from every list; this is the
        // single place ownership returns to a Box.
        let boxed = unsafe { Box::from_raw(slab_ptr) };
        if self.cache.push(boxed) {
            self.counters.inc_cache_overflow();
            log_warn!(
                "epochslab: empty-slab cache for class {} is at capacity, overflowing",
                self.size_class
            );
        }
    }

    /// Drain up to `n` fully-empty cached slabs whose `era_stamp <= era`,
    /// unmapping their pages (spec.md §4.4). The header itself is kept —
    /// only the backing page is returned to the host — and goes back into
    /// the cache retired, ready for [`Slab::remap`] on the next reuse.
    pub fn drain_cache_for_close(&self, host: &dyn PagePrimitive, era: u64, n: usize) -> usize {
        let drained = self.cache.drain(n);
        let mut unmapped = 0;
        for slab in drained {
            if slab.is_mapped() && slab.era_stamp() <= era && slab.free_count() == slab.object_count() {
                // SAFETY: popped from the cache, exclusively owned here.
                unsafe { slab.retire_page(host) };
                unmapped += 1;
            }
            // Not eligible this round (already retired, too-new era, or
            // reused by a concurrent recycle before the lock was taken):
            // stays in the cache untouched, no telemetry event.
            if self.cache.push(slab) {
                self.counters.inc_cache_overflow();
            }
        }
        unmapped
    }

    /// Tear down every slab this engine owns — unmap every still-mapped
    /// page and drop every header. Called once by
    /// [`crate::Allocator`]'s `Drop`/`destroy`, which owns the `host`
    /// primitive this needs. After this call the engine holds nothing.
    pub fn teardown(&mut self, host: &dyn PagePrimitive) {
        let lists = self.lists.get_mut();
        for head in [&mut lists.partial_head, &mut lists.full_head] {
            let mut node = *head;
            while !node.is_null() {
                // SAFETY: sole owner at teardown time (&mut self).
                let next = unsafe { (*node).links() }.next;
                if unsafe { (*node).is_mapped() } {
                    // SAFETY: node is exclusively owned here.
                    unsafe { (*node).retire_page(host) };
                }
                // SAFETY: node was minted via Box::into_raw and is being
                // torn down with no other references outstanding.
                drop(unsafe { Box::from_raw(node) });
                node = next.map_or(ptr::null_mut(), |n| n.as_ptr());
            }
            *head = ptr::null_mut();
        }
        self.current_partial.store(ptr::null_mut(), Ordering::Relaxed);
        for slab in self.cache.drain_all() {
            if slab.is_mapped() {
                // SAFETY: drained from the cache, exclusively owned here.
                unsafe { slab.retire_page(host) };
            }
            drop(slab);
        }
    }
}

impl Drop for SizeClassEngine {
    fn drop(&mut self) {
        // Best-effort header-only cleanup if `teardown` was never called
        // (pages then leak — `Allocator::drop` always calls `teardown`
        // first, which empties everything below to a no-op).
        let lists = self.lists.get_mut();
        for head in [lists.partial_head, lists.full_head] {
            let mut node = head;
            while !node.is_null() {
                // SAFETY: sole owner at Drop time (&mut self).
                let next = unsafe { (*node).links() }.next;
                // SAFETY: node was minted via Box::into_raw and is being
                // torn down with no other references outstanding.
                drop(unsafe { Box::from_raw(node) });
                node = next.map_or(ptr::null_mut(), |n| n.as_ptr());
            }
        }
    }
}
