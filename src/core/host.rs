// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Host page primitive: the only OS dependency the allocator has.
//!
//! [`PagePrimitive`] is the collaborator contract — map an aligned region,
//! unmap it, read current resident-set size — kept as a trait so tests can
//! swap in a counting fake instead of touching real memory.

use std::fs;
use std::io;
use std::ptr::{self, NonNull};

/// Map/unmap aligned pages and report resident-set size.
///
/// Implementations must return pointers aligned to the requested size, so
/// callers can recover a page base from any pointer inside it via
/// `ptr & !(size - 1)`.
pub trait PagePrimitive: Send + Sync {
    /// Map a fresh, zeroed, page-aligned region of `size` bytes.
    fn map(&self, size: usize) -> io::Result<NonNull<u8>>;

    /// Unmap a region previously returned by `map` with the same `size`.
    ///
    /// # Safety
    /// `ptr` must have been returned by `map(size)` on this primitive and
    /// not already unmapped.
    unsafe fn unmap(&self, ptr: NonNull<u8>, size: usize);

    /// Current process resident-set size, in bytes.
    fn resident_set_bytes(&self) -> usize;
}

/// Default [`PagePrimitive`]: anonymous private `mmap`/`munmap` on Linux,
/// RSS read from `/proc/self/statm`.
#[derive(Debug, Default)]
pub struct MmapPagePrimitive {
    _private: (),
}

impl MmapPagePrimitive {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl PagePrimitive for MmapPagePrimitive {
    fn map(&self, size: usize) -> io::Result<NonNull<u8>> {
        // `mmap` only guarantees alignment to the OS's native page
        // granularity, not to an arbitrary caller-requested `size` (a
        // runtime-configured `page_size` per `AllocatorConfig` need not
        // match it). Over-allocate by `size` extra bytes, round the base
        // up to a `size`-aligned address inside that range, then trim the
        // unused head/tail back down to the OS with two `munmap` calls —
        // what's left is exactly `size` bytes, `size`-aligned, so the
        // pointer this returns satisfies this trait's contract and
        // `unmap(ptr, size)` sees a plain, untrimmed mapping to release.
        let over_size = size + size;
        // SAFETY:
        // - null addr hint lets the kernel choose the mapping address
        // - over_size is caller-provided-derived and nonzero (size > 0,
        //   validated as a power of two by `AllocatorConfig::validate`)
        // - PROT_READ | PROT_WRITE is a valid protection pair
        // - MAP_PRIVATE | MAP_ANONYMOUS: single-process, not backed by a file
        // - fd -1 / offset 0 are required by MAP_ANONYMOUS
        // - mmap returns MAP_FAILED on error, checked below
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                over_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let raw_addr = raw as usize;
        let aligned_addr = (raw_addr + size - 1) & !(size - 1);
        let head_len = aligned_addr - raw_addr;
        let tail_len = over_size - head_len - size;
        if head_len > 0 {
            // SAFETY: head_len bytes at the start of the mapping we just
            // created, never touched by anyone else.
            unsafe { libc::munmap(raw, head_len) };
        }
        if tail_len > 0 {
            // SAFETY: tail_len bytes past the aligned window, inside the
            // mapping we just created.
            unsafe { libc::munmap((aligned_addr + size) as *mut libc::c_void, tail_len) };
        }
        // SAFETY: aligned_addr names the surviving, size-byte middle
        // portion of the mapping above, which mmap guarantees is non-null.
        Ok(unsafe { NonNull::new_unchecked(aligned_addr as *mut u8) })
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: caller guarantees `ptr`/`size` match a prior `map` call
        // that has not yet been unmapped.
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), size);
        }
    }

    fn resident_set_bytes(&self) -> usize {
        // /proc/self/statm: size resident shared text lib data dt (pages)
        let Ok(statm) = fs::read_to_string("/proc/self/statm") else {
            return 0;
        };
        let Some(resident_pages) = statm.split_whitespace().nth(1) else {
            return 0;
        };
        let Ok(pages) = resident_pages.parse::<usize>() else {
            return 0;
        };
        // SAFETY: none — arithmetic only.
        pages.saturating_mul(page_size())
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf with a valid name is always safe to call.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n <= 0 {
        4096
    } else {
        n as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_unmap_roundtrips() {
        let prim = MmapPagePrimitive::new();
        let ptr = prim.map(4096).expect("map should succeed");
        assert_eq!(ptr.as_ptr() as usize % 4096, 0, "mmap is page-aligned");
        // SAFETY: ptr/size match the map call above, not yet unmapped.
        unsafe { prim.unmap(ptr, 4096) };
    }

    #[test]
    fn resident_set_is_nonzero_in_a_running_process() {
        let prim = MmapPagePrimitive::new();
        assert!(prim.resident_set_bytes() > 0);
    }
}
