//! # tessera-memory
//!
//! Pooled, authority-tracking memory substrate for the Tessera container
//! stack.
//!
//! The crate provides:
//! - Power-of-two [`Pool`]s that sub-divide one backing page into
//!   binary-heap-addressed slots and recycle freed regions
//! - An [`Allocator`] that chains pools, caches the hot pool, and can trace
//!   any raw pointer back to the [`Entry`] that owns it
//! - Refcounted [`Entry`] allocation records shared by every container
//! - An optional [`Statistics`] snapshot surface
//!
//! ## Concurrency
//!
//! The allocator is single-threaded by design. Callers that share it across
//! threads must wrap every entry point in an external lock; the [`global`]
//! module provides exactly that for call sites that want the singleton
//! convenience.
//!
//! ## Features
//!
//! - `pool` (default): managed pools; without it every allocation is
//!   malloc-backed and authority queries always miss
//! - `stats` (default): allocation statistics
//! - `logging` (default): `tracing` events for pool lifecycle

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]
// Internal methods return Result for API consistency even when infallible today
#![allow(clippy::unnecessary_wraps)]

pub mod error;

mod allocator;
mod entry;
pub mod global;
mod pool;
#[cfg(feature = "stats")]
mod stats;

pub use allocator::{Allocator, AllocatorConfig};
pub use entry::Entry;
pub use error::{MemoryError, MemoryResult};
pub use pool::Pool;
#[cfg(feature = "stats")]
pub use stats::Statistics;

/// Allocation alignment, in bytes. Every entry and every user region the
/// allocator hands out is aligned to this.
pub const ALIGNMENT: usize = 16;

/// Minimum backing size of a pool.
pub const DEFAULT_POOL_SIZE: usize = 1024 * 1024;

/// Smallest poolable slot: the entry header plus one aligned unit, rounded
/// up to a power of two.
pub const MIN_ALLOCATION: usize = (Entry::SIZE + ALIGNMENT).next_power_of_two();

/// Round `value` up to the next multiple of [`ALIGNMENT`].
#[inline(always)]
#[must_use]
pub const fn align_up(value: usize) -> usize {
    (value + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// `floor(log2(value))` for non-zero `value`.
#[inline(always)]
pub(crate) const fn floor_log2(value: usize) -> u32 {
    usize::BITS - 1 - value.leading_zeros()
}
