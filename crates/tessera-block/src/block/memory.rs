//! Capacity, lifetime, and the reflection-driven construction engine.
//!
//! Every operation picks the fastest strategy available for the element
//! type: zeroing for nullifiable data, `memcpy` for POD, cell bookkeeping
//! for sparse blocks, context-aware shallow copies for nested blocks, and
//! the reflected vtable for everything else. A missing reflected operation
//! on a non-trivial type surfaces as the matching `No*` error.

use core::ptr;

use tessera_memory::Allocator;
use tessera_reflect::TypeDescriptor;

use super::Block;
use crate::error::{BlockError, BlockResult};
use crate::sparse::SparseCell;
use crate::state::DataState;

impl Block {
    // ── capacity and lifetime ──────────────────────────────────────────────

    /// Ensure at least `elements` reserved slots. Shrinks the content when
    /// `elements < count`, reallocating through the owning pool otherwise
    /// (in place whenever the pool can grow the entry).
    pub fn allocate(&mut self, ctx: &mut Allocator, elements: usize) -> BlockResult<()> {
        self.allocate_inner(ctx, elements, false, false)
    }

    /// Like [`Block::allocate`], but default-constructs the newly exposed
    /// slots and bumps `count` to `elements`.
    pub fn allocate_constructed(&mut self, ctx: &mut Allocator, elements: usize) -> BlockResult<()> {
        self.allocate_inner(ctx, elements, true, false)
    }

    /// Grow the reservation by `elements` slots.
    pub fn extend(&mut self, ctx: &mut Allocator, elements: usize) -> BlockResult<()> {
        self.allocate_inner(ctx, self.reserved + elements, false, false)
    }

    /// Shrink the reservation by up to `elements` slots.
    pub fn shrink(&mut self, ctx: &mut Allocator, elements: usize) -> BlockResult<()> {
        self.allocate_inner(ctx, self.reserved - elements.min(self.reserved), false, false)
    }

    pub(crate) fn allocate_inner(
        &mut self,
        ctx: &mut Allocator,
        elements: usize,
        construct: bool,
        set_count: bool,
    ) -> BlockResult<()> {
        let Some(ty) = self.ty else {
            return Err(BlockError::Untyped);
        };

        if elements < self.count {
            // Smaller than the initialized region: drop the tail.
            return self.remove_at(ctx, elements, self.count - elements).map(|_| ())
        }

        if self.reserved >= elements {
            if construct && self.count < elements {
                let (start, end) = (self.count, elements);
                // SAFETY: [start, end) is reserved and uninitialized.
                unsafe { self.construct_default_range(start, end)? };
                self.count = elements;
            } else if set_count {
                self.count = elements;
            }
            return Ok(());
        }

        // Growing the reservation. Sparse blocks allocate cells, so even an
        // abstract pointee type is fine; dense storage needs a concrete one.
        let stride = if self.is_sparse() {
            size_of::<SparseCell>()
        } else {
            let effective = ty.concretized();
            if effective.is_abstract {
                return Err(BlockError::AbstractInstantiation { ty: effective.token });
            }
            effective.size
        };
        debug_assert!(stride != 0, "zero-sized element type");

        self.ensure_mutable()?;
        if self.is_allocated() {
            if self.is_static() || self.entry.is_none() {
                return Err(BlockError::StaticViolation);
            }
            let entry = self.entry.expect("owned block carries an entry");
            let moved = ctx.reallocate(stride * elements, entry)?;
            if moved != entry {
                debug_assert_eq!(
                    // SAFETY: our entry is live until released below.
                    unsafe { entry.as_ref() }.uses(),
                    1,
                    "relocating a block whose memory is shared"
                );
                // SAFETY: both regions are at least count * stride bytes and
                // distinct entries never overlap.
                let fresh = unsafe { moved.as_ref() }.block_start();
                unsafe {
                    ptr::copy_nonoverlapping(self.raw.cast_const(), fresh, self.count * stride);
                }
                // SAFETY: as above; releasing our sole reference.
                if unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.free() {
                    ctx.deallocate(entry);
                }
                self.entry = Some(moved);
                self.raw = fresh;
            }
        } else {
            let entry = ctx.allocate(stride * elements)?;
            // SAFETY: freshly allocated live entry.
            self.raw = unsafe { entry.as_ref() }.block_start();
            self.entry = Some(entry);
        }
        self.reserved = elements;

        if construct && self.count < elements {
            let (start, end) = (self.count, elements);
            // SAFETY: [start, end) is reserved and uninitialized.
            unsafe { self.construct_default_range(start, end)? };
            self.count = elements;
        } else if set_count {
            self.count = elements;
        }
        Ok(())
    }

    /// Destroy the contents and release the storage; the block returns to
    /// the default state (the type is forgotten as well).
    pub fn reset(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        if let Some(entry) = self.entry {
            // SAFETY: owned entries are live while the block names them.
            if unsafe { entry.as_ref() }.uses() == 1 {
                let count = self.count;
                // SAFETY: [0, count) is the initialized region.
                unsafe { self.destroy_range(ctx, 0, count)? };
                ctx.deallocate(entry);
            } else {
                // Shared storage: drop our reference, leave the data to the
                // remaining holders.
                // SAFETY: as above.
                unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.free();
            }
        }
        self.reset_record();
        Ok(())
    }

    /// Destroy the contents but keep the reservation (sole owners only;
    /// shared storage is released instead, keeping the type).
    pub fn clear(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.ensure_mutable()?;
        if self.entry.is_none() {
            // Borrowed view: forget the elements, never touch them.
            self.count = 0;
            return Ok(());
        }
        if self.uses() == 1 {
            let count = self.count;
            // SAFETY: [0, count) is the initialized region.
            unsafe { self.destroy_range(ctx, 0, count)? };
            self.count = 0;
            return Ok(());
        }
        let ty = self.ty;
        let constrained = self.state.contains(DataState::TYPED);
        self.reset(ctx)?;
        self.ty = ty;
        if constrained {
            self.state |= DataState::TYPED;
        }
        Ok(())
    }

    /// If the buffer is borrowed, clone it into a fresh owned allocation so
    /// the block gains authority over its memory. Owned blocks are left
    /// untouched, shared or not; the reference count already expresses
    /// that ownership.
    pub fn take_authority(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        if self.entry.is_some() || !self.is_allocated() {
            return Ok(());
        }
        let constrained = self.state.contains(DataState::TYPED);
        let mut clone = self.clone_in(ctx)?;
        if constrained {
            clone.state |= DataState::TYPED;
        }
        *self = clone;
        Ok(())
    }

    /// Release the storage without running destructors; used after the
    /// elements have been moved out. The record keeps its other fields.
    pub(crate) fn release_storage(&mut self, ctx: &mut Allocator) {
        if let Some(entry) = self.entry.take() {
            // SAFETY: owned entries are live while the block names them.
            if unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.free() {
                ctx.deallocate(entry);
            }
        }
        self.raw = ptr::null_mut();
        self.reserved = 0;
        self.count = 0;
    }

    // ── construction engine ────────────────────────────────────────────────

    /// Default-construct `[start, end)`.
    ///
    /// # Safety
    ///
    /// The range must be reserved and uninitialized.
    pub(crate) unsafe fn construct_default_range(
        &mut self,
        start: usize,
        end: usize,
    ) -> BlockResult<()> {
        let ty = self.ty.ok_or(BlockError::Untyped)?;
        let stride = self.stride();
        if self.is_sparse() || ty.is_nullifiable {
            // Zeroing constructs null cells / nullifiable values.
            // SAFETY: caller guarantees the range is reserved.
            unsafe { ptr::write_bytes(self.at(start), 0, (end - start) * stride) };
            return Ok(());
        }
        let Some(ctor) = ty.default_ctor else {
            return Err(BlockError::NoDefaultCtor { ty: ty.token });
        };
        for i in start..end {
            // SAFETY: each slot is reserved, uninitialized storage of `ty`.
            unsafe { ctor(self.at(i)) };
        }
        Ok(())
    }

    /// Copy-construct `n` elements from `src[src_start..]` into
    /// `self[start..]`.
    ///
    /// # Safety
    ///
    /// The destination range must be reserved and uninitialized; the source
    /// range must be initialized; the types must be compatible.
    pub(crate) unsafe fn construct_copy_range(
        &mut self,
        ctx: &mut Allocator,
        start: usize,
        src: &Block,
        src_start: usize,
        n: usize,
    ) -> BlockResult<()> {
        let ty = self.ty.ok_or(BlockError::Untyped)?;

        if self.is_sparse() && src.is_sparse() {
            // Copy the cells, then share ownership of every pointee.
            // SAFETY: cell regions are valid per the caller contract.
            unsafe {
                ptr::copy_nonoverlapping(
                    src.cells().add(src_start).cast_const(),
                    self.cells().add(start),
                    n,
                );
            }
            for i in start..start + n {
                if let Some(mut entry) = self.cell(i).entry {
                    // SAFETY: a live cell entry stays live while referenced.
                    unsafe { entry.as_mut() }.keep();
                }
            }
            return Ok(());
        }

        if self.is_sparse() {
            // Dense source: point at its elements, binding any entries our
            // allocator recognizes (authority lookup).
            for i in 0..n {
                let target = src.at(src_start + i);
                let entry = ctx.find(target.cast_const());
                if let Some(mut entry) = entry {
                    // SAFETY: find returns live entries.
                    unsafe { entry.as_mut() }.keep();
                }
                // SAFETY: destination cells are reserved.
                unsafe {
                    self.cells().add(start + i).write(SparseCell { ptr: target, entry });
                }
            }
            return Ok(());
        }

        if ty.is_deep {
            // Nested blocks share buffers on copy; the reference count is
            // bumped here because block records never do it themselves.
            for i in 0..n {
                let source = if src.is_sparse() {
                    let cell = src.cell(src_start + i);
                    debug_assert!(!cell.is_null(), "copying from a null sparse cell");
                    // SAFETY: deep sparse cells point at Block values.
                    unsafe { &*cell.ptr.cast::<Block>() }
                } else {
                    // SAFETY: deep dense elements are Block values.
                    unsafe { &*src.at(src_start + i).cast::<Block>() }
                };
                let duplicate = Block {
                    ty: source.ty,
                    state: source.state,
                    count: source.count,
                    reserved: source.reserved,
                    raw: source.raw,
                    entry: source.entry,
                };
                if let Some(mut entry) = duplicate.entry {
                    // SAFETY: the source block keeps its entry live.
                    unsafe { entry.as_mut() }.keep();
                }
                // SAFETY: destination slots are reserved Block storage.
                unsafe { self.at(start + i).cast::<Block>().write(duplicate) };
            }
            return Ok(());
        }

        if src.is_sparse() {
            // Dense destination from sparse source: dereference each cell.
            let Some(ctor) = ty.copy_ctor else {
                return Err(BlockError::NoCopyCtor { ty: ty.token });
            };
            for i in 0..n {
                let cell = src.cell(src_start + i);
                debug_assert!(!cell.is_null(), "copying from a null sparse cell");
                // SAFETY: destination slot is uninitialized storage of `ty`;
                // the cell points at an initialized instance.
                unsafe { ctor(self.at(start + i), cell.ptr.cast_const()) };
            }
            return Ok(());
        }

        if ty.is_pod {
            // SAFETY: POD ranges are plain bytes; regions never overlap
            // (distinct blocks or distinct regions).
            unsafe {
                ptr::copy_nonoverlapping(
                    src.at(src_start).cast_const(),
                    self.at(start),
                    n * ty.size,
                );
            }
            return Ok(());
        }

        let Some(ctor) = ty.copy_ctor else {
            return Err(BlockError::NoCopyCtor { ty: ty.token });
        };
        for i in 0..n {
            // SAFETY: per the caller contract.
            unsafe { ctor(self.at(start + i), src.at(src_start + i).cast_const()) };
        }
        Ok(())
    }

    /// Move-construct `n` elements out of `src[src_start..]` into
    /// `self[start..]`. The source elements are uninitialized afterwards;
    /// the caller releases the source storage without destructors.
    ///
    /// # Safety
    ///
    /// As [`Block::construct_copy_range`], plus exclusive access to the
    /// moved-from elements.
    pub(crate) unsafe fn construct_move_range(
        &mut self,
        ctx: &mut Allocator,
        start: usize,
        src: &mut Block,
        src_start: usize,
        n: usize,
    ) -> BlockResult<()> {
        let ty = self.ty.ok_or(BlockError::Untyped)?;

        if self.is_sparse() == src.is_sparse() {
            // Identical representations relocate bitwise: values are
            // trivially relocatable, and cell ownership transfers with the
            // bits.
            // SAFETY: per the caller contract.
            unsafe {
                ptr::copy_nonoverlapping(
                    src.at(src_start).cast_const(),
                    self.at(start),
                    n * self.stride(),
                );
            }
            if src.is_sparse() {
                // The refs moved with the cells; null the source so a later
                // destroy cannot double-free.
                // SAFETY: source cells are ours to overwrite.
                unsafe { ptr::write_bytes(src.cells().add(src_start), 0, n) };
            }
            return Ok(());
        }

        if self.is_sparse() {
            // Dense source: the cells alias the source storage, one shared
            // reference per cell.
            for i in 0..n {
                let target = src.at(src_start + i);
                if let Some(mut entry) = src.entry {
                    // SAFETY: the source entry is live.
                    unsafe { entry.as_mut() }.keep();
                }
                // SAFETY: destination cells are reserved.
                unsafe {
                    self.cells()
                        .add(start + i)
                        .write(SparseCell { ptr: target, entry: src.entry });
                }
            }
            return Ok(());
        }

        // Sparse source into dense destination: move out of the pointees.
        let Some(ctor) = ty.move_ctor else {
            return Err(BlockError::NoMoveCtor { ty: ty.token });
        };
        for i in 0..n {
            let cell = src.cell(src_start + i);
            debug_assert!(!cell.is_null(), "moving from a null sparse cell");
            // SAFETY: per the caller contract; the pointee is initialized
            // and becomes uninitialized.
            unsafe { ctor(self.at(start + i), cell.ptr) };
            if let Some(entry) = cell.entry {
                // The pointee was moved out; release the storage without
                // running destructors.
                // SAFETY: cell entries are live while the cell holds a ref.
                if unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.free() {
                    ctx.deallocate(entry);
                }
            }
        }
        // SAFETY: source cells are ours to null out.
        unsafe { ptr::write_bytes(src.cells().add(src_start), 0, n) };
        Ok(())
    }

    /// Destroy `[start, end)`.
    ///
    /// # Safety
    ///
    /// The range must be initialized; it is uninitialized afterwards.
    pub(crate) unsafe fn destroy_range(
        &mut self,
        ctx: &mut Allocator,
        start: usize,
        end: usize,
    ) -> BlockResult<()> {
        let Some(ty) = self.ty else {
            return Ok(());
        };

        if self.is_sparse() {
            for i in start..end {
                let cell = self.cell(i);
                let Some(entry) = cell.entry else {
                    continue; // borrowed pointer, not ours
                };
                // SAFETY: cell entries are live while the cell holds a ref.
                if unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.free() {
                    // Last reference: the pointee dies with its storage.
                    // SAFETY: the cell points at an initialized instance.
                    unsafe { destroy_pointee(ctx, ty, cell.ptr)? };
                    ctx.deallocate(entry);
                }
            }
            // Null the cells; this is also where owned pointers reset.
            // SAFETY: the range is ours.
            unsafe { ptr::write_bytes(self.cells().add(start), 0, end - start) };
            return Ok(());
        }

        if ty.is_deep {
            for i in start..end {
                // SAFETY: deep dense elements are Block values.
                let child = unsafe { &mut *self.at(i).cast::<Block>() };
                child.reset(ctx)?;
            }
            return Ok(());
        }

        if ty.is_pod {
            return Ok(());
        }

        let Some(dtor) = ty.dtor else {
            return Err(BlockError::NoDtor { ty: ty.token });
        };
        for i in start..end {
            // SAFETY: per the caller contract.
            unsafe { dtor(self.at(i)) };
        }
        Ok(())
    }

    /// Bitwise relocation of `n` elements from index `from` to index `to`
    /// within this block. Regions may overlap.
    pub(crate) unsafe fn relocate(&mut self, from: usize, to: usize, n: usize) {
        let stride = self.stride();
        // SAFETY: per the caller contract; copy handles overlap.
        unsafe { ptr::copy(self.at(from).cast_const(), self.at(to), n * stride) };
    }

    /// Bump the owning entry's reference count (shared-buffer bookkeeping).
    pub(crate) fn keep_entry(&self) {
        if let Some(entry) = self.entry {
            // SAFETY: owned entries are live while the block names them.
            unsafe { entry.as_ptr().as_mut().expect("entry is non-null") }.keep();
        }
    }
}

/// Destroy the instance a sparse cell points at, after resolving it to its
/// actual dynamic type.
///
/// # Safety
///
/// `ptr` must point at an initialized instance of `ty` (or a type resolving
/// from it).
pub(crate) unsafe fn destroy_pointee(
    ctx: &mut Allocator,
    ty: &'static TypeDescriptor,
    ptr: *mut u8,
) -> BlockResult<()> {
    let (ty, ptr) = match ty.resolve {
        Some(resolve) => {
            // SAFETY: per the caller contract.
            let resolved = unsafe { resolve(ptr.cast_const()) };
            (resolved.ty, resolved.ptr.cast_mut())
        }
        None => (ty, ptr),
    };
    if ty.is_deep {
        // SAFETY: deep pointees are Block values.
        return unsafe { &mut *ptr.cast::<Block>() }.reset(ctx);
    }
    if ty.is_pod {
        return Ok(());
    }
    match ty.dtor {
        // SAFETY: per the caller contract.
        Some(dtor) => unsafe { dtor(ptr) },
        None => return Err(BlockError::NoDtor { ty: ty.token }),
    }
    Ok(())
}
