// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Core allocator machinery: slabs, size classes, the empty-slab cache,
//! the epoch ring, handles, and the host page primitive.

pub mod cache;
pub mod epoch;
pub mod handle;
pub mod host;
pub mod size_class;
pub mod slab;
