// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! `epochslab` — a fixed-size-class slab allocator with epoch-scoped
//! lifetime management.
//!
//! Serves workloads that allocate many small, short-lived objects whose
//! lifetimes cluster into coarse temporal phases (request handling,
//! simulation ticks, phase-shifted churn): a lock-free fast path over an
//! atomic bitmap for allocate/free, and an **epoch ring** that lets a whole
//! phase's slabs be reclaimed in one `epoch_close` call without scanning
//! live objects.
//!
//! # Quick start
//!
//! ```
//! use epochslab::Allocator;
//!
//! let alloc = Allocator::new();
//! let epoch = alloc.epoch_current();
//! let (handle, ptr) = alloc.alloc_obj_epoch(100, epoch).unwrap();
//! unsafe { ptr.as_ptr().write(0xAA) };
//! alloc.free_obj(handle).unwrap();
//!
//! alloc.epoch_advance();
//! alloc.epoch_close(epoch).unwrap();
//! ```
//!
//! # Non-goals
//!
//! General heterogeneous-size allocation, cross-process sharing,
//! defragmenting compaction, per-object reference counting, and
//! persistence are all out of scope — see `SPEC_FULL.md` in the repository
//! root for the full design.

mod allocator;
pub mod config;
mod core;
pub mod error;
mod logging;
pub mod telemetry;

pub use allocator::Allocator;
pub use config::AllocatorConfig;
pub use core::epoch::EpochStats;
pub use core::handle::Handle;
pub use core::host::{MmapPagePrimitive, PagePrimitive};
pub use error::{AllocError, ConfigError, EpochError, FreeError};
