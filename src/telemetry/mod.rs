// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 the epochslab authors

//! Atomic telemetry counters, grouped per size class (spec.md §4.6) and
//! per epoch lane (see [`crate::core::epoch::EpochStats`]). All counters
//! are relaxed atomics read-by-snapshot — no global lock, no hot-path
//! logging.

mod metrics;

pub use metrics::{ClassCounters, ClassStats};
