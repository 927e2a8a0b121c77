//! The universal, type-erased container view.
//!
//! A [`Block`] wraps an allocated region together with everything needed to
//! operate on it at runtime: the element type descriptor, a state word, the
//! initialized count, the reserved capacity, and the owning allocation
//! entry. It is the base every container facade shares.
//!
//! A block does not release anything on drop: ownership is explicit, and
//! owners call [`Block::reset`] with their allocator context, exactly like
//! the allocator's own entries. Borrowed views (`STATIC` state, no entry)
//! can be freely created, passed around and discarded.

mod insert;
mod memory;
mod mutate;

use core::ptr::NonNull;

use once_cell::sync::OnceCell;
use tessera_memory::Entry;
use tessera_reflect::{DescriptorBuilder, Reflected, TypeDescriptor};

use crate::error::{BlockError, BlockResult};
use crate::sparse::SparseCell;
use crate::state::{DataState, Phase};

/// The universal container view. See the module docs.
#[derive(Debug)]
pub struct Block {
    pub(crate) ty: Option<&'static TypeDescriptor>,
    pub(crate) state: DataState,
    pub(crate) count: usize,
    pub(crate) reserved: usize,
    pub(crate) raw: *mut u8,
    pub(crate) entry: Option<NonNull<Entry>>,
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks are themselves reflected: a deep, nullifiable record with no
/// vtable entries. The engines special-case deep elements instead of going
/// through function pointers, because nested blocks need the allocator
/// context for their refcounts.
impl Reflected for Block {
    fn descriptor() -> &'static TypeDescriptor {
        static CELL: OnceCell<TypeDescriptor> = OnceCell::new();
        CELL.get_or_init(|| {
            DescriptorBuilder::new::<Block>("Block")
                .deep()
                .nullifiable()
                .build()
        })
    }
}

impl Block {
    /// An empty, untyped block in the default state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ty: None,
            state: DataState::empty(),
            count: 0,
            reserved: 0,
            raw: core::ptr::null_mut(),
            entry: None,
        }
    }

    /// An empty block pinned to `ty`.
    #[must_use]
    pub fn from_type(ty: &'static TypeDescriptor) -> Self {
        Self {
            ty: Some(ty),
            ..Self::new()
        }
    }

    /// An empty block with an explicit state and optional type.
    #[must_use]
    pub fn from_state(state: DataState, ty: Option<&'static TypeDescriptor>) -> Self {
        Self {
            ty,
            state,
            ..Self::new()
        }
    }

    /// An empty sparse block: elements will be `{ptr, entry}` cells
    /// realizing shared ownership over instances of `ty`.
    #[must_use]
    pub fn sparse(ty: &'static TypeDescriptor) -> Self {
        Self {
            ty: Some(ty),
            state: DataState::SPARSE,
            ..Self::new()
        }
    }

    /// Borrow another block's contents: a shallow copy flagged `STATIC`,
    /// owning nothing and touching no refcounts.
    #[must_use]
    pub fn borrowed_from(other: &Block) -> Self {
        Self {
            ty: other.ty,
            state: other.state | DataState::STATIC,
            count: other.count,
            reserved: other.reserved,
            raw: other.raw,
            entry: None,
        }
    }

    /// Take another block's contents and authority, leaving it reset.
    #[must_use]
    pub fn taken_from(other: &mut Block) -> Self {
        let taken = Self {
            ty: other.ty,
            state: other.state,
            count: other.count,
            reserved: other.reserved,
            raw: other.raw,
            entry: other.entry,
        };
        other.reset_record();
        taken
    }

    /// A borrowed view over raw memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `count` initialized elements of `ty` (or sparse
    /// cells, when `state` carries `SPARSE`), alive for as long as the view
    /// is used.
    #[must_use]
    pub unsafe fn view(
        state: DataState,
        ty: &'static TypeDescriptor,
        count: usize,
        ptr: *mut u8,
    ) -> Self {
        Self {
            ty: Some(ty),
            state: state | DataState::STATIC,
            count,
            reserved: count,
            raw: ptr,
            entry: None,
        }
    }

    /// Zero the record without touching memory or refcounts.
    pub(crate) fn reset_record(&mut self) {
        *self = Self::new();
    }

    // ── accessors ──────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn ty(&self) -> Option<&'static TypeDescriptor> {
        self.ty
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> DataState {
        self.state
    }

    /// State with the constraint bits stripped.
    #[inline]
    #[must_use]
    pub fn unconstrained_state(&self) -> DataState {
        self.state.unconstrained()
    }

    /// Initialized elements.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Allocated slots.
    #[inline]
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Byte pointer to the first element.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> *const u8 {
        self.raw
    }

    #[inline]
    #[must_use]
    pub fn entry(&self) -> Option<NonNull<Entry>> {
        self.entry
    }

    /// References held on the owning entry; 1 for borrowed views, matching
    /// the convention that outside authority everything is singular.
    #[must_use]
    pub fn uses(&self) -> usize {
        match self.entry {
            // SAFETY: owned entries are live while the block names them.
            Some(entry) => unsafe { entry.as_ref() }.uses(),
            None => 1,
        }
    }

    /// Element footprint: the cell size for sparse blocks, the type size
    /// otherwise, zero when untyped.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> usize {
        if self.state.contains(DataState::SPARSE) {
            size_of::<SparseCell>()
        } else {
            self.ty.map_or(0, |ty| ty.size)
        }
    }

    /// Initialized bytes.
    #[inline]
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.count * self.stride()
    }

    /// Diagnostic token of the element type.
    #[must_use]
    pub fn token(&self) -> &'static str {
        self.ty.map_or("<untyped>", |ty| ty.token)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        !self.raw.is_null()
    }

    #[inline]
    #[must_use]
    pub fn is_untyped(&self) -> bool {
        self.ty.is_none()
    }

    #[inline]
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.state.contains(DataState::STATIC)
    }

    #[inline]
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.state.contains(DataState::CONSTANT)
    }

    #[inline]
    #[must_use]
    pub fn is_type_constrained(&self) -> bool {
        self.state.contains(DataState::TYPED)
    }

    #[inline]
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.state.contains(DataState::SPARSE)
    }

    #[inline]
    #[must_use]
    pub fn is_or(&self) -> bool {
        self.state.contains(DataState::OR)
    }

    #[inline]
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.state.contains(DataState::MISSING)
    }

    #[inline]
    #[must_use]
    pub fn is_phased(&self) -> bool {
        self.state.contains(DataState::PHASED)
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Whether the element type is itself a block.
    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.ty.is_some_and(|ty| ty.is_deep)
    }

    /// Whether the element type cannot be instantiated.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.ty.is_some_and(|ty| ty.is_abstract)
    }

    /// Whether default construction is available.
    #[must_use]
    pub fn is_constructible(&self) -> bool {
        self.ty
            .is_some_and(|ty| ty.is_nullifiable || ty.default_ctor.is_some())
    }

    /// A block is valid once it has a type or a non-default state.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ty.is_some() || !self.state.is_empty()
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    /// Exact type check by descriptor identity.
    #[must_use]
    pub fn is_type(&self, ty: &TypeDescriptor) -> bool {
        self.ty.is_some_and(|mine| mine.is(ty))
    }

    /// Whether the contained type can be interpreted as `ty`.
    #[must_use]
    pub fn casts_to(&self, ty: &TypeDescriptor) -> bool {
        self.ty.is_some_and(|mine| mine.casts_to(ty))
    }

    // ── state manipulation ─────────────────────────────────────────────────

    pub fn set_state(&mut self, state: DataState) {
        self.state = state;
    }

    pub fn toggle_state(&mut self, state: DataState, on: bool) {
        if on {
            self.state |= state;
        } else {
            self.state -= state;
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.state = self.state.with_phase(phase);
    }

    pub fn make_missing(&mut self) -> &mut Self {
        self.state |= DataState::MISSING;
        self
    }

    pub fn make_static(&mut self) -> &mut Self {
        self.state |= DataState::STATIC;
        self
    }

    pub fn make_constant(&mut self) -> &mut Self {
        self.state |= DataState::CONSTANT;
        self
    }

    pub fn make_type_constrained(&mut self) -> &mut Self {
        self.state |= DataState::TYPED;
        self
    }

    pub fn make_or(&mut self) -> &mut Self {
        self.state |= DataState::OR;
        self
    }

    pub fn make_and(&mut self) -> &mut Self {
        self.state -= DataState::OR;
        self
    }

    pub fn make_past(&mut self) -> &mut Self {
        self.set_phase(Phase::Past);
        self
    }

    pub fn make_future(&mut self) -> &mut Self {
        self.set_phase(Phase::Future);
        self
    }

    // ── state compatibility ────────────────────────────────────────────────

    /// Whether `phase` can live next to this block's phase. `Now` is
    /// permissive in both directions.
    #[must_use]
    pub fn can_fit_phase(&self, phase: Phase) -> bool {
        let mine = self.phase();
        mine == phase || mine == Phase::Now || phase == Phase::Now
    }

    /// Whether `other`'s contents could live inside this block without a
    /// state conflict.
    #[must_use]
    pub fn can_fit_state(&self, other: &Block) -> bool {
        self.is_invalid()
            || (self.is_missing() == other.is_missing()
                && (!self.is_type_constrained()
                    || other.ty.is_some_and(|ty| self.is_type(ty)))
                && (self.is_or() == other.is_or() || self.count <= 1 || other.count <= 1)
                && self.can_fit_phase(other.phase()))
    }

    /// Whether `other` can be concatenated element-for-element.
    #[must_use]
    pub fn is_concatable(&self, other: &Block) -> bool {
        if self.is_static() || self.is_constant() {
            return false;
        }
        self.can_fit_state(other)
            && (self.is_untyped() || other.ty.is_some_and(|ty| self.is_type(ty)))
    }

    /// Whether elements of `ty` can be inserted without mutation tricks.
    #[must_use]
    pub fn is_insertable(&self, ty: &'static TypeDescriptor) -> bool {
        if self.is_static() || self.is_constant() {
            return false;
        }
        if self.is_deep() != ty.is_deep {
            return false;
        }
        self.casts_to(ty)
    }

    // ── element access ─────────────────────────────────────────────────────

    /// Raw address of element `index`; unchecked.
    #[inline]
    #[must_use]
    pub(crate) fn at(&self, index: usize) -> *mut u8 {
        self.raw.wrapping_add(index * self.stride())
    }

    /// The sparse cells. Callers must hold `is_sparse()`.
    #[inline]
    pub(crate) fn cells(&self) -> *mut SparseCell {
        debug_assert!(self.is_sparse());
        self.raw.cast::<SparseCell>()
    }

    /// Sparse cell at `index`; unchecked.
    #[inline]
    pub(crate) fn cell(&self, index: usize) -> SparseCell {
        debug_assert!(index < self.reserved);
        // SAFETY: callers stay within the reserved cell region.
        unsafe { *self.cells().add(index) }
    }

    /// A borrowed single-element view. The view is static (it owns nothing)
    /// and never or-branched.
    #[must_use]
    pub fn element(&self, index: usize) -> Block {
        debug_assert!(index < self.count, "element index out of range");
        Block {
            ty: self.ty,
            state: (self.state | DataState::STATIC) - DataState::OR,
            count: 1,
            reserved: 1,
            raw: self.at(index),
            entry: None,
        }
    }

    /// Checked variant of [`Block::element`].
    pub fn element_checked(&self, index: usize) -> BlockResult<Block> {
        if index >= self.count {
            return Err(BlockError::OutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(self.element(index))
    }

    /// One level of sparsity removed: the dense view behind element `index`,
    /// or an empty block for a null sparse cell.
    #[must_use]
    pub fn element_dense(&self, index: usize) -> Block {
        let mut element = self.element(index);
        if self.is_sparse() {
            element.state -= DataState::SPARSE;
            let cell = self.cell(index);
            if cell.is_null() {
                return Block::new();
            }
            element.raw = cell.ptr;
            element.reserved = 1;
        }
        element
    }

    /// Dense view resolved to the element's actual dynamic type, when the
    /// descriptor can report it.
    #[must_use]
    pub fn element_resolved(&self, index: usize) -> Block {
        let element = self.element_dense(index);
        let Some(ty) = self.ty else {
            return element;
        };
        if element.raw.is_null() {
            return element;
        }
        let Some(resolve) = ty.resolve else {
            return element;
        };
        // SAFETY: element.raw points at an initialized instance of `ty`.
        let resolved = unsafe { resolve(element.raw.cast_const()) };
        Block {
            ty: Some(resolved.ty),
            state: element.state,
            count: 1,
            reserved: 1,
            raw: resolved.ptr.cast_mut(),
            entry: None,
        }
    }

    /// The nested block stored at `index` of a deep block, seen through one
    /// level of sparsity. `None` for null sparse cells.
    pub(crate) fn deep_child(&self, index: usize) -> Option<&Block> {
        debug_assert!(self.is_deep());
        if self.is_sparse() {
            let cell = self.cell(index);
            if cell.is_null() {
                return None;
            }
            // SAFETY: deep sparse cells point at Block values.
            Some(unsafe { &*cell.ptr.cast::<Block>() })
        } else {
            // SAFETY: deep dense elements are Block values in our buffer.
            Some(unsafe { &*self.at(index).cast::<Block>() })
        }
    }

    pub(crate) fn deep_child_mut(&mut self, index: usize) -> Option<&mut Block> {
        debug_assert!(self.is_deep());
        if self.is_sparse() {
            let cell = self.cell(index);
            if cell.is_null() {
                return None;
            }
            // SAFETY: deep sparse cells point at Block values.
            Some(unsafe { &mut *cell.ptr.cast::<Block>() })
        } else {
            let ptr = self.at(index);
            // SAFETY: deep dense elements are Block values in our buffer.
            Some(unsafe { &mut *ptr.cast::<Block>() })
        }
    }

    /// Number of nested blocks, this one included.
    #[must_use]
    pub fn count_deep(&self) -> usize {
        if !self.is_deep() {
            return 1;
        }
        let mut counter = 1;
        for i in 0..self.count {
            if let Some(child) = self.deep_child(i) {
                counter += child.count_deep();
            }
        }
        counter
    }

    /// Sum of leaf elements across all nested blocks.
    #[must_use]
    pub fn count_elements_deep(&self) -> usize {
        if self.ty.is_none() {
            return 0;
        }
        if !self.is_deep() {
            return self.count;
        }
        let mut counter = 0;
        for i in 0..self.count {
            if let Some(child) = self.deep_child(i) {
                counter += child.count_elements_deep();
            }
        }
        counter
    }

    /// Nested sub-block by deep index, where 0 is this block.
    #[must_use]
    pub fn block_deep(&self, index: usize) -> Option<&Block> {
        if index == 0 {
            return Some(self);
        }
        if !self.is_deep() {
            return None;
        }
        let mut index = index - 1;
        for i in 0..self.count {
            let Some(child) = self.deep_child(i) else {
                continue;
            };
            let nested = child.count_deep();
            if index < nested {
                if let Some(found) = child.block_deep(index) {
                    return Some(found);
                }
            }
            index -= nested;
        }
        None
    }

    /// Leaf element by deep index, counting across the whole hierarchy.
    #[must_use]
    pub fn element_deep(&self, index: usize) -> Option<Block> {
        self.ty?;
        if !self.is_deep() {
            return (index < self.count).then(|| self.element(index));
        }
        let mut index = index;
        for i in 0..self.count {
            let Some(child) = self.deep_child(i) else {
                continue;
            };
            let leaves = child.count_elements_deep();
            if index < leaves {
                return child.element_deep(index);
            }
            index -= leaves;
        }
        None
    }

    /// A borrowed member view over `[start, start + count)`. The region is
    /// static and type-pinned; the const variant is [`Block::crop_const`].
    pub fn crop(&mut self, start: usize, count: usize) -> BlockResult<Block> {
        if start + count > self.count {
            return Err(BlockError::OutOfRange {
                index: start + count,
                count: self.count,
            });
        }
        if count == 0 {
            return Ok(Block::from_state(self.state, self.ty));
        }
        Ok(Block {
            ty: self.ty,
            state: self.state | DataState::MEMBER,
            count,
            reserved: count,
            raw: self.at(start),
            entry: None,
        })
    }

    /// Read-only crop; see [`Block::crop`].
    pub fn crop_const(&self, start: usize, count: usize) -> BlockResult<Block> {
        if start + count > self.count {
            return Err(BlockError::OutOfRange {
                index: start + count,
                count: self.count,
            });
        }
        if count == 0 {
            return Ok(Block::from_state(self.state | DataState::CONSTANT, self.ty));
        }
        Ok(Block {
            ty: self.ty,
            state: self.state | DataState::MEMBER | DataState::CONSTANT,
            count,
            reserved: count,
            raw: self.at(start),
            entry: None,
        })
    }

    // ── guards ─────────────────────────────────────────────────────────────

    /// Mutation guard: constant blocks refuse every mutating operation.
    pub(crate) fn ensure_mutable(&self) -> BlockResult<()> {
        if self.is_constant() {
            return Err(BlockError::ConstViolation);
        }
        Ok(())
    }

    /// Reallocation guard: borrowed buffers cannot move or resize.
    pub(crate) fn ensure_resizable(&self) -> BlockResult<()> {
        self.ensure_mutable()?;
        if self.is_static() {
            return Err(BlockError::StaticViolation);
        }
        Ok(())
    }
}
