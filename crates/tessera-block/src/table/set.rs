//! Typed hash set facades.

use core::marker::PhantomData;

use tessera_memory::Allocator;
use tessera_reflect::Reflected;

use super::{TableCore, patch_handles};
use crate::block::Block;
use crate::error::BlockResult;
use crate::state::DataState;
use crate::vector::TypedVector;

/// A one-element borrowed view over a caller's value, valid for the
/// duration of the call.
pub(crate) fn element_view<T: Reflected>(value: &T) -> Block {
    // SAFETY: `value` is an initialized T outliving the view's use.
    unsafe {
        Block::view(
            DataState::empty(),
            T::descriptor(),
            1,
            core::ptr::from_ref(value).cast_mut().cast(),
        )
    }
}

/// An unordered Robin-Hood hash set of `T`.
///
/// `T`'s descriptor must reflect equality and hashing; inserts copy the
/// value into table-owned storage. Like every container here, the set is
/// released with [`UnorderedSet::reset`], not on drop.
pub struct UnorderedSet<T: Reflected> {
    core: TableCore,
    _marker: PhantomData<T>,
}

impl<T: Reflected> Default for UnorderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflected> UnorderedSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: TableCore::new(T::descriptor(), None),
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.core.reserved()
    }

    /// Pre-size for `count` elements.
    pub fn allocate(&mut self, ctx: &mut Allocator, count: usize) -> BlockResult<()> {
        self.core.allocate(ctx, count).map(|_| ())
    }

    /// Insert a value; returns false when an equal value was already
    /// present.
    pub fn insert(&mut self, ctx: &mut Allocator, value: T) -> BlockResult<bool> {
        let view = element_view(&value);
        let outcome = self.core.insert(ctx, &view, None)?;
        Ok(outcome.inserted)
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        matches!(self.core.find_slot(&element_view(value)), Ok(Some(_)))
    }

    /// Remove a value; returns true when it was present.
    pub fn remove(&mut self, ctx: &mut Allocator, value: &T) -> BlockResult<bool> {
        Ok(self
            .core
            .remove_key(ctx, &element_view(value))?
            .is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.core
            .occupied()
            // SAFETY: occupied slots hold initialized Ts.
            .map(|slot| unsafe { &*self.core.key_ptr(slot).cast::<T>() })
    }

    pub fn clear(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.core.clear(ctx)
    }

    pub fn reset(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.core.reset(ctx)
    }

    pub fn clone_in(&self, ctx: &mut Allocator) -> BlockResult<Self> {
        Ok(Self {
            core: self.core.clone_in(ctx)?,
            _marker: PhantomData,
        })
    }

    /// Robin-Hood probe invariant check, for diagnostics and tests.
    pub fn validate_probes(&self) -> BlockResult<bool> {
        self.core.validate_probes()
    }
}

impl<T: Reflected> core::fmt::Debug for UnorderedSet<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnorderedSet").field("len", &self.len()).finish()
    }
}

impl<T: Reflected> PartialEq for UnorderedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|value| other.contains(value))
    }
}

/// A Robin-Hood hash set that additionally remembers insertion order.
///
/// The order list holds slot handles into the hash table and is patched
/// whenever the table shifts or rehashes slots; removals patch it by
/// swap-removing, so order is only guaranteed until the first removal.
pub struct OrderedSet<T: Reflected> {
    core: TableCore,
    order: TypedVector<u64>,
    _marker: PhantomData<T>,
}

impl<T: Reflected> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflected> OrderedSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: TableCore::new(T::descriptor(), None),
            order: TypedVector::new(),
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn insert(&mut self, ctx: &mut Allocator, value: T) -> BlockResult<bool> {
        let view = element_view(&value);
        let outcome = self.core.insert(ctx, &view, None)?;
        patch_handles(&mut self.order, outcome.remap.as_deref(), &outcome.moves);
        if outcome.inserted {
            self.order.push(ctx, outcome.slot as u64)?;
        }
        Ok(outcome.inserted)
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        matches!(self.core.find_slot(&element_view(value)), Ok(Some(_)))
    }

    pub fn remove(&mut self, ctx: &mut Allocator, value: &T) -> BlockResult<bool> {
        let Some(outcome) = self.core.remove_key(ctx, &element_view(value))? else {
            return Ok(false);
        };
        if let Some(position) = self.order.find(&(outcome.slot as u64)) {
            self.order.swap_remove(position)?;
        }
        patch_handles(&mut self.order, None, &outcome.moves);
        Ok(true)
    }

    /// Iterate in insertion order (perturbed by removals, which
    /// swap-remove their handle).
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order
            .as_slice()
            .iter()
            // SAFETY: handles always point at occupied slots holding Ts.
            .map(|&slot| unsafe { &*self.core.key_ptr(slot as usize).cast::<T>() })
    }

    pub fn clear(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.core.clear(ctx)?;
        self.order.clear(ctx)
    }

    pub fn reset(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.core.reset(ctx)?;
        self.order.reset(ctx)
    }

    pub fn validate_probes(&self) -> BlockResult<bool> {
        self.core.validate_probes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_memory::Allocator;

    #[test]
    fn insert_find_remove_round_trip() {
        let mut ctx = Allocator::new();
        let mut set = UnorderedSet::<i64>::new();

        for value in 0..100 {
            assert!(set.insert(&mut ctx, value).unwrap());
        }
        assert!(!set.insert(&mut ctx, 42).unwrap(), "duplicates are refused");
        assert_eq!(set.len(), 100);
        assert!(set.validate_probes().unwrap());

        for value in 0..100 {
            assert!(set.contains(&value));
        }
        assert!(!set.contains(&100));

        for value in (0..100).step_by(2) {
            assert!(set.remove(&mut ctx, &value).unwrap());
        }
        assert_eq!(set.len(), 50);
        assert!(set.validate_probes().unwrap());
        assert!(set.contains(&1));
        assert!(!set.contains(&2));

        set.reset(&mut ctx).unwrap();
        ctx.collect_garbage();
        assert_eq!(ctx.pool_count(), 0);
    }

    #[test]
    fn string_sets_run_the_reflected_paths() {
        let mut ctx = Allocator::new();
        let mut set = UnorderedSet::<String>::new();
        assert!(set.insert(&mut ctx, "alpha".to_owned()).unwrap());
        assert!(set.insert(&mut ctx, "beta".to_owned()).unwrap());
        assert!(!set.insert(&mut ctx, "alpha".to_owned()).unwrap());
        assert!(set.contains(&"beta".to_owned()));
        assert!(set.remove(&mut ctx, &"alpha".to_owned()).unwrap());
        assert_eq!(set.len(), 1);
        set.reset(&mut ctx).unwrap();
    }

    #[test]
    fn ordered_sets_iterate_in_insertion_order() {
        let mut ctx = Allocator::new();
        let mut set = OrderedSet::<i64>::new();
        for value in [5, 3, 9, 1, 7] {
            set.insert(&mut ctx, value).unwrap();
        }
        let seen: Vec<i64> = set.iter().copied().collect();
        assert_eq!(seen, [5, 3, 9, 1, 7]);
        set.reset(&mut ctx).unwrap();
    }

    #[test]
    fn ordered_sets_survive_rehashes() {
        let mut ctx = Allocator::new();
        let mut set = OrderedSet::<i64>::new();
        let values: Vec<i64> = (0..200).map(|i| i * 13 + 7).collect();
        for &value in &values {
            set.insert(&mut ctx, value).unwrap();
        }
        let seen: Vec<i64> = set.iter().copied().collect();
        assert_eq!(seen, values, "order survives growth rehashes");
        assert!(set.validate_probes().unwrap());
        set.reset(&mut ctx).unwrap();
    }

    #[test]
    fn set_equality_is_content_based() {
        let mut ctx = Allocator::new();
        let mut a = UnorderedSet::<i64>::new();
        let mut b = UnorderedSet::<i64>::new();
        for value in 0..10 {
            a.insert(&mut ctx, value).unwrap();
        }
        for value in (0..10).rev() {
            b.insert(&mut ctx, value).unwrap();
        }
        assert_eq!(a, b);
        b.remove(&mut ctx, &3).unwrap();
        assert_ne!(a, b);

        a.reset(&mut ctx).unwrap();
        b.reset(&mut ctx).unwrap();
    }

    #[test]
    fn clones_are_independent() {
        let mut ctx = Allocator::new();
        let mut set = UnorderedSet::<i64>::new();
        for value in 0..20 {
            set.insert(&mut ctx, value).unwrap();
        }
        let mut copy = set.clone_in(&mut ctx).unwrap();
        assert_eq!(set, copy);

        copy.remove(&mut ctx, &7).unwrap();
        assert!(set.contains(&7));
        assert!(!copy.contains(&7));

        set.reset(&mut ctx).unwrap();
        copy.reset(&mut ctx).unwrap();
    }
}
