//! Process-wide singleton allocator facade.
//!
//! The core takes an [`Allocator`] as an explicit context parameter; this
//! module wraps one instance in a mutex for call sites that want the
//! singleton convenience (tests, examples, interop shims). Cross-thread use
//! is legal only because every access goes through the lock.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::allocator::Allocator;

static GLOBAL: Lazy<Mutex<Allocator>> = Lazy::new(|| Mutex::new(Allocator::new()));

/// Run `f` with exclusive access to the global allocator.
pub fn with<R>(f: impl FnOnce(&mut Allocator) -> R) -> R {
    f(&mut GLOBAL.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_allocations_resolve_through_the_facade() {
        let entry = with(|alloc| alloc.allocate(64)).unwrap();
        // SAFETY: live entry.
        let user = unsafe { entry.as_ref() }.block_start().cast_const();
        assert_eq!(with(|alloc| alloc.references(user)), 1);
        assert!(with(|alloc| alloc.free(user, 1)));
    }
}
