//! Refcounted allocation records.
//!
//! An [`Entry`] is prefixed to every user region the allocator hands out:
//!
//! ```text
//! [Entry header][user bytes ...................]
//!  ^ aligned     ^ aligned, `allocated_bytes` long
//! ```
//!
//! While `uses > 0` the region is never reclaimed. The last dereference
//! returns the slot to its pool's free list, or to the system allocator for
//! malloc-backed entries.

use core::ptr::NonNull;

use crate::pool::Pool;
use crate::ALIGNMENT;

/// A single allocation record.
///
/// `pool` is the owning [`Pool`], or `None` for entries allocated straight
/// from the system allocator (freed with it as well).
#[repr(C)]
pub struct Entry {
    allocated_bytes: usize,
    uses: usize,
    pool: Option<NonNull<Pool>>,
}

impl Entry {
    /// Header footprint: `size_of::<Entry>()` rounded up so the user region
    /// that follows stays aligned to [`ALIGNMENT`].
    pub const SIZE: usize = (size_of::<Entry>() + ALIGNMENT - 1) & !(ALIGNMENT - 1);

    pub(crate) const fn new(allocated_bytes: usize, pool: Option<NonNull<Pool>>) -> Self {
        Self {
            allocated_bytes,
            uses: 1,
            pool,
        }
    }

    /// User-visible capacity in bytes (excludes the header).
    #[inline]
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    pub(crate) fn set_allocated_bytes(&mut self, bytes: usize) {
        self.allocated_bytes = bytes;
    }

    /// Number of references currently keeping this entry alive.
    #[inline]
    #[must_use]
    pub fn uses(&self) -> usize {
        self.uses
    }

    /// The owning pool, or `None` for malloc-backed entries.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> Option<NonNull<Pool>> {
        self.pool
    }

    /// Header plus user capacity.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.allocated_bytes
    }

    /// First byte of the user region.
    #[inline]
    #[must_use]
    pub fn block_start(&self) -> *mut u8 {
        (core::ptr::from_ref(self) as *mut u8).wrapping_add(Self::SIZE)
    }

    /// One past the last user byte.
    #[inline]
    #[must_use]
    pub fn block_end(&self) -> *const u8 {
        self.block_start().wrapping_add(self.allocated_bytes)
    }

    /// Whether `ptr` falls inside the user region.
    #[inline]
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.block_start() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + self.allocated_bytes
    }

    /// Add one reference.
    #[inline]
    pub fn keep(&mut self) {
        self.uses += 1;
    }

    /// Add `count` references.
    #[inline]
    pub fn keep_n(&mut self, count: usize) {
        self.uses += count;
    }

    /// Drop `count` references; returns `true` when the entry is fully
    /// dereferenced and must be handed back to the allocator.
    ///
    /// Decrementing below zero is a refcount underflow; safe builds assert,
    /// release builds saturate.
    #[inline]
    pub fn free_n(&mut self, count: usize) -> bool {
        debug_assert!(
            count <= self.uses,
            "refcount underflow: freeing {count} of {} references",
            self.uses
        );
        self.uses = self.uses.saturating_sub(count);
        self.uses == 0
    }

    /// Drop one reference; see [`Entry::free_n`].
    #[inline]
    pub fn free(&mut self) -> bool {
        self.free_n(1)
    }

    pub(crate) fn set_uses(&mut self, uses: usize) {
        self.uses = uses;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(Entry::SIZE % ALIGNMENT, 0);
        assert!(Entry::SIZE >= size_of::<Entry>());
    }

    #[test]
    fn refcount_round_trip() {
        let mut entry = Entry::new(64, None);
        assert_eq!(entry.uses(), 1);
        entry.keep_n(3);
        assert_eq!(entry.uses(), 4);
        assert!(!entry.free_n(3));
        assert!(entry.free());
        assert_eq!(entry.uses(), 0);
    }

    #[test]
    fn containment_covers_exactly_the_user_region() {
        let entry = Entry::new(32, None);
        let start = entry.block_start();
        assert!(entry.contains(start));
        assert!(entry.contains(start.wrapping_add(31)));
        assert!(!entry.contains(start.wrapping_add(32)));
        assert!(!entry.contains(core::ptr::from_ref(&entry).cast()));
    }
}
