//! Robin-Hood open-addressed hash table core.
//!
//! Keys (and, for maps, values) live in type-erased blocks sharing one
//! `reserved`. The info bytes are co-allocated after the key slots:
//!
//! ```text
//! [key slots ............][info bytes ...........][sentinel]
//!  reserved * stride       reserved                 1
//! ```
//!
//! An info byte of 0 marks an empty slot; `n >= 1` marks an occupied slot
//! probing `n - 1` positions away from its natural bucket. The sentinel is
//! a permanent `1` so iterators terminate without bounds checks.
//!
//! Insertion steals from richer slots by shifting the displaced cluster one
//! position right; erasure back-shifts the cluster left. Both report the
//! slot moves they perform so the insertion-ordered facades can patch their
//! handle lists; a rehash reports a full old-to-new remap.

mod map;
mod set;

pub use map::{OrderedMap, UnorderedMap};
pub use set::{OrderedSet, UnorderedSet};

use core::ptr::{self, NonNull};

use smallvec::SmallVec;
use tessera_memory::{Allocator, Entry};
use tessera_reflect::TypeDescriptor;

use crate::block::Block;
use crate::error::BlockResult;
use crate::state::DataState;

/// Smallest number of slots an allocated table carries.
pub(crate) const MINIMAL_ALLOCATION: usize = 8;

/// Probe lengths saturate here; hitting the cap forces a rehash.
const MAX_PROBE: u8 = u8::MAX;

/// Slot relocations performed by one insert or erase: `(from, to)` pairs in
/// the order they happened, each slot moving at most once.
pub(crate) type SlotMoves = SmallVec<[(usize, usize); 8]>;

/// What an insertion did.
pub struct InsertOutcome {
    /// False when the key already existed (maps overwrite the value).
    pub inserted: bool,
    /// Slot the key ended up in.
    pub slot: usize,
    pub(crate) moves: SlotMoves,
    /// Full slot remap when the insertion triggered a rehash.
    pub(crate) remap: Option<Vec<usize>>,
}

/// What an erasure did.
pub struct EraseOutcome {
    /// Slot the key was removed from.
    pub slot: usize,
    pub(crate) moves: SlotMoves,
}

/// The type-erased table shared by every set and map facade.
pub struct TableCore {
    keys: Block,
    values: Option<Block>,
    info: *mut u8,
}

impl TableCore {
    /// A table for `key_ty` keys, with a parallel value region when
    /// `value_ty` is given.
    #[must_use]
    pub fn new(key_ty: &'static TypeDescriptor, value_ty: Option<&'static TypeDescriptor>) -> Self {
        let mut keys = Block::from_type(key_ty);
        keys.make_type_constrained();
        let values = value_ty.map(|ty| {
            let mut block = Block::from_type(ty);
            block.make_type_constrained();
            block
        });
        Self {
            keys,
            values,
            info: ptr::null_mut(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.count()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.keys.reserved()
    }

    #[must_use]
    pub fn key_type(&self) -> &'static TypeDescriptor {
        self.keys.ty().expect("tables are always typed")
    }

    #[must_use]
    pub fn value_type(&self) -> Option<&'static TypeDescriptor> {
        self.values.as_ref().and_then(Block::ty)
    }

    #[inline]
    fn info_at(&self, slot: usize) -> u8 {
        debug_assert!(slot <= self.reserved());
        // SAFETY: info spans reserved + 1 bytes.
        unsafe { *self.info.add(slot) }
    }

    #[inline]
    fn set_info(&mut self, slot: usize, value: u8) {
        debug_assert!(slot < self.reserved());
        // SAFETY: info spans reserved + 1 bytes.
        unsafe { *self.info.add(slot) = value };
    }

    /// Raw address of the key in `slot`.
    #[inline]
    pub(crate) fn key_ptr(&self, slot: usize) -> *mut u8 {
        self.keys.at(slot)
    }

    /// Raw address of the value in `slot`.
    #[inline]
    pub(crate) fn value_ptr(&self, slot: usize) -> *mut u8 {
        self.values
            .as_ref()
            .expect("value access on a set table")
            .at(slot)
    }

    /// Borrowed single-element view of the key in `slot`.
    #[must_use]
    pub fn key_view(&self, slot: usize) -> Block {
        Block {
            ty: self.keys.ty(),
            state: (self.keys.state() | DataState::STATIC) - DataState::OR,
            count: 1,
            reserved: 1,
            raw: self.keys.at(slot),
            entry: None,
        }
    }

    /// Borrowed single-element view of the value in `slot`.
    #[must_use]
    pub fn value_view(&self, slot: usize) -> Block {
        let values = self.values.as_ref().expect("value access on a set table");
        Block {
            ty: values.ty(),
            state: (values.state() | DataState::STATIC) - DataState::OR,
            count: 1,
            reserved: 1,
            raw: values.at(slot),
            entry: None,
        }
    }

    /// Iterator over the occupied slot indices. Empty slots are skipped by
    /// walking the info bytes; the sentinel guarantees termination.
    pub fn occupied(&self) -> OccupiedSlots<'_> {
        OccupiedSlots {
            info: self.info,
            slot: 0,
            reserved: self.reserved(),
            _marker: core::marker::PhantomData,
        }
    }

    // ── capacity ───────────────────────────────────────────────────────────

    /// Pre-size the table for `count` elements.
    pub fn allocate(&mut self, ctx: &mut Allocator, count: usize) -> BlockResult<Option<Vec<usize>>> {
        self.reserve_for(ctx, count)
    }

    /// Ensure `needed` elements fit under the 80 % load factor, rehashing
    /// to twice the capacity when they do not. Returns the slot remap when
    /// a rehash happened.
    fn reserve_for(&mut self, ctx: &mut Allocator, needed: usize) -> BlockResult<Option<Vec<usize>>> {
        let reserved = self.reserved();
        if reserved != 0 && needed * 5 <= reserved * 4 {
            return Ok(None);
        }
        let mut capacity = reserved.max(MINIMAL_ALLOCATION / 2);
        while needed * 5 > capacity * 2 * 4 {
            capacity *= 2;
        }
        self.rehash_to(ctx, capacity * 2).map(Some)
    }

    /// Rebuild the table at `new_capacity` slots (power of two). Existing
    /// elements relocate bitwise. Returns `new_slot_of_old_slot`, with
    /// `usize::MAX` for slots that were empty.
    fn rehash_to(&mut self, ctx: &mut Allocator, mut new_capacity: usize) -> BlockResult<Vec<usize>> {
        debug_assert!(new_capacity.is_power_of_two());
        debug_assert!(new_capacity >= MINIMAL_ALLOCATION);
        debug_assert!(self.len() * 5 <= new_capacity * 4);

        // Hash everything up front so a missing hash op cannot fail the
        // table mid-move.
        let old_reserved = self.reserved();
        let mut occupied: Vec<(usize, u64)> = Vec::with_capacity(self.len());
        for slot in self.occupied() {
            occupied.push((slot, self.key_view(slot).hash()?));
        }

        loop {
            if let Some(new_of_old) = self.try_rehash_into(ctx, new_capacity, &occupied, old_reserved)? {
                #[cfg(feature = "logging")]
                tracing::trace!(
                    capacity = new_capacity,
                    len = self.len(),
                    "table rehashed"
                );
                return Ok(new_of_old);
            }
            // A probe chain overflowed; very unlikely, but a larger table
            // always resolves it.
            new_capacity *= 2;
        }
    }

    /// One rehash attempt. The old storage is left intact until the new
    /// layout is complete, so an overflow retry is always safe. Returns
    /// `None` on probe overflow.
    fn try_rehash_into(
        &mut self,
        ctx: &mut Allocator,
        new_capacity: usize,
        occupied: &[(usize, u64)],
        old_reserved: usize,
    ) -> BlockResult<Option<Vec<usize>>> {
        let key_stride = self.keys.stride();
        let value_stride = self.values.as_ref().map(Block::stride);

        // Keys and info bytes share one allocation; the sentinel byte
        // closes the region.
        let key_entry = ctx.allocate(key_stride * new_capacity + new_capacity + 1)?;
        // SAFETY: freshly allocated live entry.
        let key_raw = unsafe { key_entry.as_ref() }.block_start();
        let info = key_raw.wrapping_add(key_stride * new_capacity);
        // SAFETY: the info region is within the fresh allocation.
        unsafe {
            ptr::write_bytes(info, 0, new_capacity);
            *info.add(new_capacity) = 1;
        }

        let value_entry = match value_stride {
            Some(stride) => {
                let entry = match ctx.allocate(stride * new_capacity) {
                    Ok(entry) => entry,
                    Err(error) => {
                        release_entry(ctx, key_entry);
                        return Err(error.into());
                    }
                };
                Some(entry)
            }
            None => None,
        };
        let value_raw = value_entry.map(|entry| {
            // SAFETY: freshly allocated live entry.
            unsafe { entry.as_ref() }.block_start()
        });

        let mask = new_capacity - 1;
        let mut old_of_new = vec![usize::MAX; new_capacity];
        for &(old_slot, hash) in occupied {
            // SAFETY: old storage is intact; new storage is exclusively
            // ours.
            let placed = unsafe {
                place_moved(
                    self.keys.at(old_slot),
                    self.values.as_ref().map(|values| values.at(old_slot)),
                    key_raw,
                    value_raw,
                    info,
                    mask,
                    key_stride,
                    value_stride.unwrap_or(0),
                    old_slot,
                    hash,
                    &mut old_of_new,
                )
            };
            if !placed {
                release_entry(ctx, key_entry);
                if let Some(entry) = value_entry {
                    release_entry(ctx, entry);
                }
                return Ok(None);
            }
        }

        // Commit: release the old storage (elements moved bitwise) and
        // swap in the new.
        if let Some(old) = self.keys.entry.take() {
            release_entry(ctx, old);
        }
        self.keys.raw = key_raw;
        self.keys.entry = Some(key_entry);
        self.keys.reserved = new_capacity;
        self.info = info;
        if let Some(values) = self.values.as_mut() {
            if let Some(old) = values.entry.take() {
                release_entry(ctx, old);
            }
            values.raw = value_raw.expect("value storage was allocated");
            values.entry = value_entry;
            values.reserved = new_capacity;
        }

        let mut new_of_old = vec![usize::MAX; old_reserved.max(1)];
        for (new_slot, &old_slot) in old_of_new.iter().enumerate() {
            if old_slot != usize::MAX {
                new_of_old[old_slot] = new_slot;
            }
        }
        Ok(Some(new_of_old))
    }

    // ── operations ─────────────────────────────────────────────────────────

    /// Insert a copy of a single-element key view (and value view for
    /// maps). An existing equal key is not duplicated; for maps its value
    /// is overwritten.
    pub fn insert(
        &mut self,
        ctx: &mut Allocator,
        key: &Block,
        value: Option<&Block>,
    ) -> BlockResult<InsertOutcome> {
        debug_assert_eq!(key.count(), 1, "insert expects a single-element key view");
        debug_assert_eq!(value.is_some(), self.values.is_some());

        let remap = self.reserve_for(ctx, self.len() + 1)?;
        let hash = key.hash()?;
        let mask = self.reserved() - 1;
        let mut slot = (hash as usize) & mask;
        let mut probe: u8 = 1;

        // Find the existing key or the Robin-Hood insertion point.
        loop {
            let info = self.info_at(slot);
            if info == 0 || info < probe {
                break;
            }
            if info == probe && self.key_view(slot).compare(key) {
                if let Some(value) = value {
                    let values = self.values.as_mut().expect("map table carries values");
                    // SAFETY: the slot holds an initialized value; we
                    // replace it.
                    unsafe {
                        values.destroy_range(ctx, slot, slot + 1)?;
                        values.construct_copy_range(ctx, slot, value, 0, 1)?;
                    }
                }
                return Ok(InsertOutcome {
                    inserted: false,
                    slot,
                    moves: SlotMoves::new(),
                    remap,
                });
            }
            probe += 1;
            slot = (slot + 1) & mask;
            if probe == MAX_PROBE {
                return self.insert_after_forced_growth(ctx, key, value, remap);
            }
        }

        // Shift the displaced cluster one position right, then construct
        // the new element in the hole.
        let mut moves = SlotMoves::new();
        let mut end = slot;
        while self.info_at(end) != 0 {
            if self.info_at(end) >= MAX_PROBE - 1 {
                return self.insert_after_forced_growth(ctx, key, value, remap);
            }
            end = (end + 1) & mask;
        }
        let key_stride = self.keys.stride();
        let value_stride = self.values.as_ref().map(Block::stride);
        let mut cursor = end;
        while cursor != slot {
            let prev = (cursor + mask) & mask;
            // SAFETY: slot regions are disjoint; `cursor` is a hole.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.keys.at(prev).cast_const(),
                    self.keys.at(cursor),
                    key_stride,
                );
                if let (Some(values), Some(stride)) = (self.values.as_ref(), value_stride) {
                    ptr::copy_nonoverlapping(
                        values.at(prev).cast_const(),
                        values.at(cursor),
                        stride,
                    );
                }
            }
            let shifted = self.info_at(prev) + 1;
            self.set_info(cursor, shifted);
            moves.push((prev, cursor));
            cursor = prev;
        }

        // SAFETY: `slot` is a hole after the shift.
        unsafe {
            self.keys.construct_copy_range(ctx, slot, key, 0, 1)?;
        }
        if let Some(value) = value {
            let values = self.values.as_mut().expect("map table carries values");
            // SAFETY: as above.
            unsafe { values.construct_copy_range(ctx, slot, value, 0, 1)? };
        }
        self.set_info(slot, probe);
        self.keys.count += 1;
        let count = self.keys.count;
        if let Some(values) = self.values.as_mut() {
            values.count = count;
        }
        Ok(InsertOutcome {
            inserted: true,
            slot,
            moves,
            remap,
        })
    }

    /// A probe chain hit the length cap: grow, then retry, composing the
    /// remaps.
    fn insert_after_forced_growth(
        &mut self,
        ctx: &mut Allocator,
        key: &Block,
        value: Option<&Block>,
        earlier: Option<Vec<usize>>,
    ) -> BlockResult<InsertOutcome> {
        let doubled = self.reserved() * 2;
        let grown = self.rehash_to(ctx, doubled)?;
        let mut outcome = self.insert(ctx, key, value)?;
        let combined = compose_remaps(earlier, Some(grown));
        outcome.remap = compose_remaps(combined, outcome.remap);
        Ok(outcome)
    }

    /// Find the slot holding a key equal to the single-element view.
    pub fn find_slot(&self, key: &Block) -> BlockResult<Option<usize>> {
        if self.reserved() == 0 || self.is_empty() {
            return Ok(None);
        }
        let hash = key.hash()?;
        let mask = self.reserved() - 1;
        let mut slot = (hash as usize) & mask;
        let mut probe: u8 = 1;
        loop {
            let info = self.info_at(slot);
            if info == 0 || info < probe {
                return Ok(None);
            }
            if info == probe && self.key_view(slot).compare(key) {
                return Ok(Some(slot));
            }
            probe += 1;
            slot = (slot + 1) & mask;
            if probe == MAX_PROBE {
                return Ok(None);
            }
        }
    }

    /// Remove the key in `slot`, back-shifting the cluster behind it.
    pub fn erase(&mut self, ctx: &mut Allocator, slot: usize) -> BlockResult<EraseOutcome> {
        debug_assert!(self.info_at(slot) != 0, "erasing an empty slot");
        // SAFETY: the slot holds initialized key (and value) elements.
        unsafe {
            self.keys.destroy_range(ctx, slot, slot + 1)?;
        }
        if let Some(values) = self.values.as_mut() {
            // SAFETY: as above.
            unsafe { values.destroy_range(ctx, slot, slot + 1)? };
        }
        self.set_info(slot, 0);

        let mask = self.reserved() - 1;
        let key_stride = self.keys.stride();
        let value_stride = self.values.as_ref().map(Block::stride);
        let mut moves = SlotMoves::new();
        let mut hole = slot;
        let mut next = (slot + 1) & mask;
        while self.info_at(next) > 1 {
            // SAFETY: `hole` was just vacated; `next` is initialized.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.keys.at(next).cast_const(),
                    self.keys.at(hole),
                    key_stride,
                );
                if let (Some(values), Some(stride)) = (self.values.as_ref(), value_stride) {
                    ptr::copy_nonoverlapping(values.at(next).cast_const(), values.at(hole), stride);
                }
            }
            let shifted = self.info_at(next) - 1;
            self.set_info(hole, shifted);
            self.set_info(next, 0);
            moves.push((next, hole));
            hole = next;
            next = (next + 1) & mask;
        }

        self.keys.count -= 1;
        let count = self.keys.count;
        if let Some(values) = self.values.as_mut() {
            values.count = count;
        }
        Ok(EraseOutcome { slot, moves })
    }

    /// Find and remove a key; `None` when absent.
    pub fn remove_key(
        &mut self,
        ctx: &mut Allocator,
        key: &Block,
    ) -> BlockResult<Option<EraseOutcome>> {
        match self.find_slot(key)? {
            Some(slot) => Ok(Some(self.erase(ctx, slot)?)),
            None => Ok(None),
        }
    }

    /// Destroy all elements, keeping the reservation.
    pub fn clear(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        let slots: Vec<usize> = self.occupied().collect();
        for slot in slots {
            // SAFETY: occupied slots hold initialized elements.
            unsafe {
                self.keys.destroy_range(ctx, slot, slot + 1)?;
            }
            if let Some(values) = self.values.as_mut() {
                // SAFETY: as above.
                unsafe { values.destroy_range(ctx, slot, slot + 1)? };
            }
            self.set_info(slot, 0);
        }
        self.keys.count = 0;
        if let Some(values) = self.values.as_mut() {
            values.count = 0;
        }
        Ok(())
    }

    /// Destroy all elements and release the storage.
    pub fn reset(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.clear(ctx)?;
        self.keys.release_storage(ctx);
        if let Some(values) = self.values.as_mut() {
            values.release_storage(ctx);
        }
        self.info = ptr::null_mut();
        Ok(())
    }

    /// Deep-copy the table: fresh storage, every key and value
    /// copy-constructed.
    pub fn clone_in(&self, ctx: &mut Allocator) -> BlockResult<TableCore> {
        let mut fresh = TableCore::new(self.key_type(), self.value_type());
        fresh.reserve_for(ctx, self.len())?;
        for slot in self.occupied() {
            let key = self.key_view(slot);
            let value = self.values.as_ref().map(|_| self.value_view(slot));
            fresh.insert(ctx, &key, value.as_ref())?;
        }
        Ok(fresh)
    }

    /// Verify the Robin-Hood invariant: every occupied slot's info byte
    /// matches its actual displacement from the natural bucket.
    pub fn validate_probes(&self) -> BlockResult<bool> {
        if self.reserved() == 0 {
            return Ok(true);
        }
        let mask = self.reserved() - 1;
        for slot in self.occupied() {
            let hash = self.key_view(slot).hash()?;
            let bucket = (hash as usize) & mask;
            let displacement = (slot + self.reserved() - bucket) & mask;
            if usize::from(self.info_at(slot)) != displacement + 1 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Iterator over occupied slot indices; see [`TableCore::occupied`].
pub struct OccupiedSlots<'a> {
    info: *const u8,
    slot: usize,
    reserved: usize,
    _marker: core::marker::PhantomData<&'a TableCore>,
}

impl Iterator for OccupiedSlots<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.info.is_null() {
            return None;
        }
        // The sentinel byte is non-zero, so this scan always terminates.
        // SAFETY: info spans reserved + 1 bytes.
        while unsafe { *self.info.add(self.slot) } == 0 {
            self.slot += 1;
        }
        if self.slot >= self.reserved {
            return None;
        }
        let found = self.slot;
        self.slot += 1;
        Some(found)
    }
}

fn release_entry(ctx: &mut Allocator, entry: NonNull<Entry>) {
    // SAFETY: the entry is live and carries our only reference.
    if unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.free() {
        ctx.deallocate(entry);
    }
}

/// Patch an insertion-order handle list after table surgery: apply a rehash
/// remap first, then the cluster moves (each handle moves at most once).
pub(crate) fn patch_handles(
    handles: &mut crate::vector::TypedVector<u64>,
    remap: Option<&[usize]>,
    moves: &[(usize, usize)],
) {
    for handle in handles.as_mut_slice() {
        if let Some(remap) = remap {
            *handle = remap[*handle as usize] as u64;
        }
        for &(from, to) in moves {
            if *handle == from as u64 {
                *handle = to as u64;
                break;
            }
        }
    }
}

/// Chain two slot remaps into one old-to-newest table.
fn compose_remaps(first: Option<Vec<usize>>, second: Option<Vec<usize>>) -> Option<Vec<usize>> {
    match (first, second) {
        (None, second) => second,
        (first, None) => first,
        (Some(first), Some(second)) => Some(
            first
                .into_iter()
                .map(|mid| {
                    if mid == usize::MAX {
                        usize::MAX
                    } else {
                        second.get(mid).copied().unwrap_or(usize::MAX)
                    }
                })
                .collect(),
        ),
    }
}

/// Bitwise Robin-Hood placement used during a rehash: relocate one key
/// (and value) into the new arrays, shifting displaced clusters and keeping
/// `old_of_new` in sync. Returns false on probe overflow.
///
/// # Safety
///
/// The new arrays must be exclusively owned, sized for `mask + 1` slots,
/// with the info region zeroed; the old slot pointers must be valid for
/// reads of one stride.
#[allow(clippy::too_many_arguments)]
unsafe fn place_moved(
    old_key: *const u8,
    old_value: Option<*mut u8>,
    new_keys: *mut u8,
    new_values: Option<*mut u8>,
    info: *mut u8,
    mask: usize,
    key_stride: usize,
    value_stride: usize,
    old_slot: usize,
    hash: u64,
    old_of_new: &mut [usize],
) -> bool {
    let mut slot = (hash as usize) & mask;
    let mut probe: u8 = 1;
    loop {
        // SAFETY: slot <= mask, info spans mask + 2 bytes.
        let occupant = unsafe { *info.add(slot) };
        if occupant == 0 {
            break;
        }
        if occupant < probe {
            // Steal: shift the cluster right one position.
            let mut end = slot;
            // SAFETY: as above; the table is under 80 % load, so an empty
            // slot exists.
            while unsafe { *info.add(end) } != 0 {
                if unsafe { *info.add(end) } >= MAX_PROBE - 1 {
                    return false;
                }
                end = (end + 1) & mask;
            }
            let mut cursor = end;
            while cursor != slot {
                let prev = (cursor + mask) & mask;
                // SAFETY: disjoint slot regions inside the new arrays.
                unsafe {
                    ptr::copy_nonoverlapping(
                        new_keys.add(prev * key_stride).cast_const(),
                        new_keys.add(cursor * key_stride),
                        key_stride,
                    );
                    if let Some(values) = new_values {
                        ptr::copy_nonoverlapping(
                            values.add(prev * value_stride).cast_const(),
                            values.add(cursor * value_stride),
                            value_stride,
                        );
                    }
                    *info.add(cursor) = *info.add(prev) + 1;
                }
                old_of_new[cursor] = old_of_new[prev];
                cursor = prev;
            }
            break;
        }
        probe += 1;
        slot = (slot + 1) & mask;
        if probe == MAX_PROBE {
            return false;
        }
    }

    // SAFETY: `slot` is a hole; the old slot holds one initialized element
    // that relocates bitwise.
    unsafe {
        ptr::copy_nonoverlapping(old_key, new_keys.add(slot * key_stride), key_stride);
        if let (Some(values), Some(old)) = (new_values, old_value) {
            ptr::copy_nonoverlapping(
                old.cast_const(),
                values.add(slot * value_stride),
                value_stride,
            );
        }
        *info.add(slot) = probe;
    }
    old_of_new[slot] = old_slot;
    true
}
