//! Typed hash map facades.

use core::marker::PhantomData;

use tessera_memory::Allocator;
use tessera_reflect::Reflected;

use super::set::element_view;
use super::{TableCore, patch_handles};
use crate::error::BlockResult;
use crate::vector::TypedVector;

/// An unordered Robin-Hood hash map from `K` to `V`.
///
/// Keys and values live in two parallel type-erased regions sharing one
/// reservation. `K`'s descriptor must reflect equality and hashing.
pub struct UnorderedMap<K: Reflected, V: Reflected> {
    core: TableCore,
    _marker: PhantomData<(K, V)>,
}

impl<K: Reflected, V: Reflected> Default for UnorderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Reflected, V: Reflected> UnorderedMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: TableCore::new(K::descriptor(), Some(V::descriptor())),
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

    /// Pre-size for `count` entries.
    pub fn allocate(&mut self, ctx: &mut Allocator, count: usize) -> BlockResult<()> {
        self.core.allocate(ctx, count).map(|_| ())
    }

    /// Insert a pair. An existing key keeps its slot and has its value
    /// overwritten; returns false in that case.
    pub fn insert(&mut self, ctx: &mut Allocator, key: K, value: V) -> BlockResult<bool> {
        let key_view = element_view(&key);
        let value_view = element_view(&value);
        let outcome = self.core.insert(ctx, &key_view, Some(&value_view))?;
        Ok(outcome.inserted)
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.core.find_slot(&element_view(key)) {
            // SAFETY: occupied slots hold initialized values.
            Ok(Some(slot)) => Some(unsafe { &*self.core.value_ptr(slot).cast::<V>() }),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.core.find_slot(&element_view(key)) {
            // SAFETY: occupied slots hold initialized values; exclusive
            // through &mut self.
            Ok(Some(slot)) => Some(unsafe { &mut *self.core.value_ptr(slot).cast::<V>() }),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        matches!(self.core.find_slot(&element_view(key)), Ok(Some(_)))
    }

    /// Remove by key; returns true when the key was present.
    pub fn remove_key(&mut self, ctx: &mut Allocator, key: &K) -> BlockResult<bool> {
        Ok(self.core.remove_key(ctx, &element_view(key))?.is_some())
    }

    /// Remove every pair whose value equals `value`; returns how many went.
    pub fn remove_value(&mut self, ctx: &mut Allocator, value: &V) -> BlockResult<usize>
    where
        V: PartialEq,
    {
        let mut removed = 0;
        loop {
            let found = self.core.occupied().find(|&slot| {
                // SAFETY: occupied slots hold initialized values.
                (unsafe { &*self.core.value_ptr(slot).cast::<V>() }) == value
            });
            let Some(slot) = found else { break };
            self.core.erase(ctx, slot)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.core.occupied().map(|slot| {
            // SAFETY: occupied slots hold initialized pairs.
            unsafe {
                (
                    &*self.core.key_ptr(slot).cast::<K>(),
                    &*self.core.value_ptr(slot).cast::<V>(),
                )
            }
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
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

impl<K: Reflected, V: Reflected> core::fmt::Debug for UnorderedMap<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnorderedMap").field("len", &self.len()).finish()
    }
}

impl<K: Reflected, V: Reflected + PartialEq> PartialEq for UnorderedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|found| found == value))
    }
}

/// A Robin-Hood hash map that additionally remembers insertion order; see
/// [`super::OrderedSet`] for the handle-list mechanics.
pub struct OrderedMap<K: Reflected, V: Reflected> {
    core: TableCore,
    order: TypedVector<u64>,
    _marker: PhantomData<(K, V)>,
}

impl<K: Reflected, V: Reflected> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Reflected, V: Reflected> OrderedMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: TableCore::new(K::descriptor(), Some(V::descriptor())),
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

    pub fn insert(&mut self, ctx: &mut Allocator, key: K, value: V) -> BlockResult<bool> {
        let key_view = element_view(&key);
        let value_view = element_view(&value);
        let outcome = self.core.insert(ctx, &key_view, Some(&value_view))?;
        patch_handles(&mut self.order, outcome.remap.as_deref(), &outcome.moves);
        if outcome.inserted {
            self.order.push(ctx, outcome.slot as u64)?;
        }
        Ok(outcome.inserted)
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.core.find_slot(&element_view(key)) {
            // SAFETY: occupied slots hold initialized values.
            Ok(Some(slot)) => Some(unsafe { &*self.core.value_ptr(slot).cast::<V>() }),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        matches!(self.core.find_slot(&element_view(key)), Ok(Some(_)))
    }

    pub fn remove_key(&mut self, ctx: &mut Allocator, key: &K) -> BlockResult<bool> {
        let Some(outcome) = self.core.remove_key(ctx, &element_view(key))? else {
            return Ok(false);
        };
        if let Some(position) = self.order.find(&(outcome.slot as u64)) {
            self.order.swap_remove(position)?;
        }
        patch_handles(&mut self.order, None, &outcome.moves);
        Ok(true)
    }

    pub fn remove_value(&mut self, ctx: &mut Allocator, value: &V) -> BlockResult<usize>
    where
        V: PartialEq,
    {
        let mut removed = 0;
        loop {
            let found = self.core.occupied().find(|&slot| {
                // SAFETY: occupied slots hold initialized values.
                (unsafe { &*self.core.value_ptr(slot).cast::<V>() }) == value
            });
            let Some(slot) = found else { break };
            let outcome = self.core.erase(ctx, slot)?;
            if let Some(position) = self.order.find(&(outcome.slot as u64)) {
                self.order.swap_remove(position)?;
            }
            patch_handles(&mut self.order, None, &outcome.moves);
            removed += 1;
        }
        Ok(removed)
    }

    /// Iterate pairs in insertion order (perturbed by removals).
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.order.as_slice().iter().map(|&slot| {
            // SAFETY: handles always point at occupied slots.
            unsafe {
                (
                    &*self.core.key_ptr(slot as usize).cast::<K>(),
                    &*self.core.value_ptr(slot as usize).cast::<V>(),
                )
            }
        })
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
