//! The pool-chain allocator.
//!
//! An [`Allocator`] is an explicit context object: every container operation
//! that allocates, reallocates, or touches refcounts receives one. It is
//! single-threaded by design; see the crate docs and the [`crate::global`]
//! facade.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::entry::Entry;
use crate::error::{MemoryError, MemoryResult};
use crate::pool::Pool;
#[cfg(feature = "stats")]
use crate::stats::Statistics;
use crate::{ALIGNMENT, DEFAULT_POOL_SIZE};

/// Boot-time allocator knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    default_pool_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl AllocatorConfig {
    /// Minimum backing size for new pools; rounded up to a power of two and
    /// never below [`crate::MIN_ALLOCATION`].
    pub fn with_default_pool_size(mut self, bytes: usize) -> Self {
        self.default_pool_size = bytes.max(crate::MIN_ALLOCATION).next_power_of_two();
        self
    }

    #[must_use]
    pub fn default_pool_size(&self) -> usize {
        self.default_pool_size
    }
}

/// Pool chain plus hot-pool cache.
///
/// Dropping the allocator releases every pool, which invalidates every entry
/// allocated from it; containers must be reset first.
pub struct Allocator {
    chain: Option<NonNull<Pool>>,
    last_found: Option<NonNull<Pool>>,
    config: AllocatorConfig,
    #[cfg(feature = "stats")]
    stats: Statistics,
}

// SAFETY: the allocator owns its pools exclusively and has no interior
// mutability; moving it (or guarding it with an external lock, as the global
// facade does) is sound. It is deliberately not Sync.
unsafe impl Send for Allocator {}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    #[must_use]
    pub fn with_config(config: AllocatorConfig) -> Self {
        Self {
            chain: None,
            last_found: None,
            config,
            #[cfg(feature = "stats")]
            stats: Statistics::default(),
        }
    }

    /// Allocate `size` user bytes. Never calls any constructors.
    pub fn allocate(&mut self, size: usize) -> MemoryResult<NonNull<Entry>> {
        if cfg!(debug_assertions) && size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        #[cfg(feature = "pool")]
        {
            // Try the available pools first.
            let mut cursor = self.chain;
            while let Some(mut pool) = cursor {
                // SAFETY: chained pools are owned by this allocator.
                let pool = unsafe { pool.as_mut() };
                if let Some(entry) = pool.allocate(size) {
                    #[cfg(feature = "stats")]
                    // SAFETY: freshly allocated live entry.
                    self.stats
                        .on_entry_allocated(unsafe { entry.as_ref() }.total_size());
                    return Ok(entry);
                }
                cursor = pool.next;
            }

            // The chain can't satisfy the request; prepend a new pool.
            let backing = self
                .config
                .default_pool_size
                .max((Entry::SIZE + size).next_power_of_two());
            let Some(mut pool) = Pool::create(backing) else {
                return Err(MemoryError::OutOfMemory { size });
            };
            #[cfg(feature = "stats")]
            self.stats.on_pool_created(backing);

            // SAFETY: freshly created pool, exclusively ours.
            let pool_mut = unsafe { pool.as_mut() };
            let entry = pool_mut
                .allocate(size)
                .ok_or(MemoryError::OutOfMemory { size })?;
            pool_mut.next = self.chain;
            self.chain = Some(pool);
            #[cfg(feature = "stats")]
            // SAFETY: freshly allocated live entry.
            self.stats
                .on_entry_allocated(unsafe { entry.as_ref() }.total_size());
            Ok(entry)
        }

        #[cfg(not(feature = "pool"))]
        {
            let entry = aligned_allocate(size)?;
            #[cfg(feature = "stats")]
            self.stats.on_entry_allocated(Entry::SIZE + size);
            Ok(entry)
        }
    }

    /// Reallocate an entry to `size` user bytes.
    ///
    /// Attempts in-place resizing through the owning pool; on collision a
    /// fresh entry is returned and the caller is responsible for copying the
    /// data and releasing the previous entry. Never copies, never frees.
    pub fn reallocate(
        &mut self,
        size: usize,
        entry: NonNull<Entry>,
    ) -> MemoryResult<NonNull<Entry>> {
        if cfg!(debug_assertions) && size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        // SAFETY: caller guarantees entry is live and owned by this
        // allocator.
        let (uses, pool, _old_total) = {
            let header = unsafe { entry.as_ref() };
            (header.uses(), header.pool(), header.total_size())
        };
        debug_assert!(uses > 0, "reallocating an unused entry");

        if let Some(mut pool) = pool {
            // SAFETY: the entry's pool back-pointer is owned by this
            // allocator.
            if unsafe { pool.as_mut() }.reallocate(entry, size) {
                #[cfg(feature = "stats")]
                self.stats.on_entry_resized(_old_total, Entry::SIZE + size);
                return Ok(entry);
            }
        }

        // Collision, or a malloc-backed entry: memory moves.
        self.allocate(size)
    }

    /// Release an entry's storage. Never calls any destructors.
    pub fn deallocate(&mut self, entry: NonNull<Entry>) {
        // SAFETY: caller guarantees entry is live and owned by this
        // allocator.
        let (pool, total_size) = {
            let header = unsafe { entry.as_ref() };
            (header.pool(), header.total_size())
        };
        #[cfg(feature = "stats")]
        self.stats.on_entry_released(total_size);

        match pool {
            // SAFETY: the pool back-pointer is owned by this allocator.
            Some(mut pool) => unsafe { pool.as_mut() }.deallocate(entry),
            None => {
                let layout = Layout::from_size_align(total_size, ALIGNMENT)
                    .expect("entry layout was validated on allocation");
                // SAFETY: malloc-backed entries were allocated with this
                // exact layout.
                unsafe { std::alloc::dealloc(entry.as_ptr().cast(), layout) };
            }
        }
    }

    /// Resolve a raw pointer to the live entry that owns it.
    pub fn find(&mut self, ptr: *const u8) -> Option<NonNull<Entry>> {
        // The pool that resolved the previous lookup is the hot region.
        if let Some(pool) = self.last_found {
            // SAFETY: chained pools are owned by this allocator.
            if let Some(entry) = unsafe { pool.as_ref() }.find(ptr) {
                return Some(entry);
            }
        }

        let mut cursor = self.chain;
        while let Some(pool) = cursor {
            // SAFETY: chained pools are owned by this allocator.
            let pool_ref = unsafe { pool.as_ref() };
            if let Some(entry) = pool_ref.find(ptr) {
                self.last_found = Some(pool);
                return Some(entry);
            }
            cursor = pool_ref.next;
        }
        None
    }

    /// Whether `ptr` falls inside any pool's byte range, live or not.
    pub fn check_authority(&self, ptr: *const u8) -> bool {
        let mut cursor = self.chain;
        while let Some(pool) = cursor {
            // SAFETY: chained pools are owned by this allocator.
            let pool_ref = unsafe { pool.as_ref() };
            if pool_ref.contains(ptr) {
                return true;
            }
            cursor = pool_ref.next;
        }
        false
    }

    /// Number of references held on the entry that owns `ptr`, or 0 when the
    /// pointer is outside our authority.
    pub fn references(&mut self, ptr: *const u8) -> usize {
        self.find(ptr)
            // SAFETY: find returns live entries.
            .map_or(0, |entry| unsafe { entry.as_ref() }.uses())
    }

    /// Add `count` references to the entry that owns `ptr`, if any.
    pub fn keep(&mut self, ptr: *const u8, count: usize) {
        debug_assert!(count != 0);
        if let Some(mut entry) = self.find(ptr) {
            // SAFETY: find returns live entries.
            unsafe { entry.as_mut() }.keep_n(count);
        }
    }

    /// Drop `count` references from the entry that owns `ptr`.
    ///
    /// Returns `true` when the entry was fully dereferenced and its storage
    /// released. Static or foreign memory is left untouched.
    pub fn free(&mut self, ptr: *const u8, count: usize) -> bool {
        debug_assert!(count != 0);
        let Some(mut entry) = self.find(ptr) else {
            return false;
        };
        // SAFETY: find returns live entries.
        let header = unsafe { entry.as_mut() };
        if header.uses() <= count {
            self.deallocate(entry);
            return true;
        }
        header.free_n(count);
        false
    }

    /// Release every pool with no live entries.
    pub fn collect_garbage(&mut self) {
        self.last_found = None;

        while let Some(pool) = self.chain {
            // SAFETY: chained pools are owned by this allocator.
            let pool_ref = unsafe { pool.as_ref() };
            if pool_ref.is_in_use() {
                break;
            }
            self.chain = pool_ref.next;
            self.release_pool(pool);
        }

        let Some(mut prev) = self.chain else { return };
        // SAFETY: chained pools are owned by this allocator.
        let mut cursor = unsafe { prev.as_ref() }.next;
        while let Some(pool) = cursor {
            // SAFETY: chained pools are owned by this allocator.
            let pool_ref = unsafe { pool.as_ref() };
            let next = pool_ref.next;
            if pool_ref.is_in_use() {
                prev = pool;
            } else {
                // SAFETY: prev stays behind cursor in the same chain.
                unsafe { prev.as_mut() }.next = next;
                self.release_pool(pool);
            }
            cursor = next;
        }
    }

    fn release_pool(&mut self, pool: NonNull<Pool>) {
        #[cfg(feature = "stats")]
        // SAFETY: pool was created by this allocator and is being unlinked.
        self.stats
            .on_pool_released(unsafe { pool.as_ref() }.total_bytes());
        #[cfg(feature = "logging")]
        // SAFETY: as above.
        tracing::trace!(
            total_bytes = unsafe { pool.as_ref() }.total_bytes(),
            "pool released"
        );
        // SAFETY: pools are created via Box::into_raw in Pool::create and
        // unlinked exactly once.
        drop(unsafe { Box::from_raw(pool.as_ptr()) });
    }

    /// Statistics snapshot.
    #[cfg(feature = "stats")]
    #[cfg_attr(docsrs, doc(cfg(feature = "stats")))]
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Number of pools currently chained.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.chain;
        while let Some(pool) = cursor {
            count += 1;
            // SAFETY: chained pools are owned by this allocator.
            cursor = unsafe { pool.as_ref() }.next;
        }
        count
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        let mut cursor = self.chain;
        self.chain = None;
        while let Some(pool) = cursor {
            // SAFETY: chained pools are owned by this allocator; each is
            // released exactly once.
            cursor = unsafe { pool.as_ref() }.next;
            // SAFETY: as above.
            drop(unsafe { Box::from_raw(pool.as_ptr()) });
        }
    }
}

/// Malloc-backed entry, used when managed pools are disabled.
#[cfg(not(feature = "pool"))]
fn aligned_allocate(size: usize) -> MemoryResult<NonNull<Entry>> {
    let layout = Layout::from_size_align(Entry::SIZE + size, ALIGNMENT)
        .map_err(|_| MemoryError::OutOfMemory { size })?;
    // SAFETY: layout has non-zero size.
    let raw = unsafe { std::alloc::alloc(layout) };
    let entry = NonNull::new(raw.cast::<Entry>()).ok_or(MemoryError::OutOfMemory { size })?;
    // SAFETY: freshly allocated, properly sized region.
    unsafe { entry.as_ptr().write(Entry::new(size, None)) };
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned() {
        let mut allocator = Allocator::new();
        for size in [1usize, 5, 16, 100, 4096] {
            let entry = allocator.allocate(size).unwrap();
            assert_eq!(entry.as_ptr() as usize % ALIGNMENT, 0);
            // SAFETY: live entry.
            let user = unsafe { entry.as_ref() }.block_start();
            assert_eq!(user as usize % ALIGNMENT, 0);
        }
    }

    #[test]
    fn zero_size_is_rejected_in_safe_builds() {
        if cfg!(debug_assertions) {
            let mut allocator = Allocator::new();
            assert_eq!(allocator.allocate(0), Err(MemoryError::ZeroSize));
        }
    }

    #[cfg(feature = "pool")]
    #[test]
    fn oversized_requests_get_their_own_pool() {
        let mut allocator = Allocator::new();
        let _small = allocator.allocate(64).unwrap();
        assert_eq!(allocator.pool_count(), 1);

        let big = allocator.allocate(4 * 1024 * 1024).unwrap();
        assert_eq!(allocator.pool_count(), 2);
        // SAFETY: live entry.
        assert_eq!(unsafe { big.as_ref() }.allocated_bytes(), 4 * 1024 * 1024);
    }

    #[cfg(feature = "pool")]
    #[test]
    fn collect_garbage_releases_idle_pools() {
        let mut allocator = Allocator::new();
        let entry = allocator.allocate(128).unwrap();
        let big = allocator.allocate(2 * 1024 * 1024).unwrap();
        assert_eq!(allocator.pool_count(), 2);

        allocator.deallocate(big);
        allocator.collect_garbage();
        assert_eq!(allocator.pool_count(), 1);

        allocator.deallocate(entry);
        allocator.collect_garbage();
        assert_eq!(allocator.pool_count(), 0);
    }

    #[cfg(feature = "pool")]
    #[test]
    fn keep_and_free_balance() {
        let mut allocator = Allocator::new();
        let entry = allocator.allocate(64).unwrap();
        // SAFETY: live entry.
        let user = unsafe { entry.as_ref() }.block_start().cast_const();

        assert_eq!(allocator.references(user), 1);
        allocator.keep(user, 2);
        assert_eq!(allocator.references(user), 3);
        assert!(!allocator.free(user, 2));
        assert_eq!(allocator.references(user), 1);
        assert!(allocator.free(user, 1));
        assert_eq!(allocator.references(user), 0);
    }

    #[cfg(all(feature = "pool", feature = "stats"))]
    #[test]
    fn statistics_track_the_frontend_and_backend() {
        let mut allocator = Allocator::new();
        let baseline = allocator.statistics();
        assert_eq!(baseline, Statistics::default());

        let entry = allocator.allocate(100).unwrap();
        let stats = allocator.statistics();
        assert_eq!(stats.pools, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes_allocated_by_backend, DEFAULT_POOL_SIZE);
        assert_eq!(stats.bytes_allocated_by_frontend, Entry::SIZE + 100);

        allocator.deallocate(entry);
        let stats = allocator.statistics();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.bytes_allocated_by_frontend, 0);
    }
}
