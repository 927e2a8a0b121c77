//! Insertion, removal, merging, gathering, and the idempotent normal form.

use tessera_memory::Allocator;
use tessera_reflect::TypeDescriptor;

use super::Block;
use crate::error::{BlockError, BlockResult};
use crate::state::{DataState, Direction, Phase};

impl Block {
    /// A shallow duplicate sharing the same buffer, with the reference
    /// count bumped. The caller owns the duplicate and must reset it.
    #[must_use]
    pub(crate) fn shared_from(other: &Block) -> Block {
        let duplicate = Block {
            ty: other.ty,
            state: other.state,
            count: other.count,
            reserved: other.reserved,
            raw: other.raw,
            entry: other.entry,
        };
        duplicate.keep_entry();
        duplicate
    }

    /// Append one nested block element, transferring its authority into the
    /// slot.
    pub(crate) fn push_inner_block(&mut self, ctx: &mut Allocator, inner: Block) -> BlockResult<()> {
        debug_assert!(self.is_deep());
        let at = self.count;
        self.allocate_inner(ctx, at + 1, false, false)?;
        // SAFETY: slot `at` is reserved Block storage.
        unsafe { self.at(at).cast::<Block>().write(inner) };
        self.count = at + 1;
        Ok(())
    }

    /// Insert a copy of every element of `other` at `at`, shifting the tail
    /// right. Type mutation applies: an incompatible `other` deepens this
    /// block and is inserted as a single nested element (sharing its
    /// buffer). Returns the number of inserted elements.
    pub fn insert_block(&mut self, ctx: &mut Allocator, other: &Block, at: usize) -> BlockResult<usize> {
        if other.count == 0 {
            return Ok(0);
        }
        let other_ty = other.ty.ok_or(BlockError::Untyped)?;
        self.ensure_mutable()?;

        if self.mutate(ctx, other_ty)? {
            self.push_inner_block(ctx, Block::shared_from(other))?;
            return Ok(1);
        }

        let at = at.min(self.count);
        let old_count = self.count;
        self.allocate_inner(ctx, old_count + other.count, false, false)?;
        if at < old_count {
            debug_assert!(self.uses() <= 1, "shifting elements shared with another holder");
            // SAFETY: the tail relocates into freshly reserved slots.
            unsafe { self.relocate(at, at + other.count, old_count - at) };
        }
        // SAFETY: [at, at + other.count) is uninitialized after the shift.
        if let Err(error) = unsafe { self.construct_copy_range(ctx, at, other, 0, other.count) } {
            // Close the hole so the block stays coherent.
            if at < old_count {
                // SAFETY: the tail moves back over the never-initialized hole.
                unsafe { self.relocate(at + other.count, at, old_count - at) };
            }
            return Err(error);
        }
        self.count = old_count + other.count;
        Ok(other.count)
    }

    /// Move every element of `other` in at `at`; `other` is left reset.
    pub fn insert_block_move(
        &mut self,
        ctx: &mut Allocator,
        other: &mut Block,
        at: usize,
    ) -> BlockResult<usize> {
        if other.count == 0 {
            other.reset(ctx)?;
            return Ok(0);
        }
        let other_ty = other.ty.ok_or(BlockError::Untyped)?;
        self.ensure_mutable()?;

        if self.mutate(ctx, other_ty)? {
            self.push_inner_block(ctx, Block::taken_from(other))?;
            return Ok(1);
        }

        let at = at.min(self.count);
        let old_count = self.count;
        let moved = other.count;
        self.allocate_inner(ctx, old_count + moved, false, false)?;
        if at < old_count {
            debug_assert!(self.uses() <= 1, "shifting elements shared with another holder");
            // SAFETY: the tail relocates into freshly reserved slots.
            unsafe { self.relocate(at, at + moved, old_count - at) };
        }
        // SAFETY: [at, at + moved) is uninitialized after the shift.
        if let Err(error) = unsafe { self.construct_move_range(ctx, at, other, 0, moved) } {
            if at < old_count {
                // SAFETY: the tail moves back over the never-initialized hole.
                unsafe { self.relocate(at + moved, at, old_count - at) };
            }
            return Err(error);
        }
        self.count = old_count + moved;
        // The elements have moved out (or are aliased by our cells); release
        // the source storage without destructors.
        other.release_storage(ctx);
        other.reset_record();
        Ok(moved)
    }

    /// Append a raw pointer to a sparse block.
    ///
    /// The cell binds the allocation that owns `ptr` when our allocator
    /// recognizes it (sharing ownership); foreign pointers stay borrowed.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized instance of the block's element
    /// type, alive for as long as the cell exists.
    pub unsafe fn push_pointer(&mut self, ctx: &mut Allocator, ptr: *mut u8) -> BlockResult<()> {
        debug_assert!(self.is_sparse());
        self.ensure_mutable()?;
        let at = self.count;
        self.allocate_inner(ctx, at + 1, false, false)?;
        let entry = ctx.find(ptr.cast_const());
        if let Some(mut entry) = entry {
            // SAFETY: find returns live entries.
            unsafe { entry.as_mut() }.keep();
        }
        // SAFETY: cell `at` is freshly reserved.
        unsafe {
            self.cells()
                .add(at)
                .write(crate::sparse::SparseCell { ptr, entry });
        }
        self.count = at + 1;
        Ok(())
    }

    /// Insert only the elements not already present, by deep equality.
    pub fn merge_block(&mut self, ctx: &mut Allocator, other: &Block) -> BlockResult<usize> {
        let mut inserted = 0;
        for i in 0..other.count {
            let element = other.element_resolved(i);
            if self.find_block(&element).is_none() {
                let at = self.count;
                inserted += self.insert_block(ctx, &element, at)?;
            }
        }
        Ok(inserted)
    }

    /// Linear scan for a single-element pattern, comparing resolved
    /// elements.
    #[must_use]
    pub fn find_block(&self, value: &Block) -> Option<usize> {
        debug_assert!(value.count == 1, "find expects a single-element pattern");
        (0..self.count).find(|&i| self.element_resolved(i).compare(value))
    }

    /// Remove `[start, start + n)`, closing the gap. Constant and static
    /// blocks only allow the POD tail-truncation special case. When the
    /// block empties, its storage is released.
    pub fn remove_at(&mut self, ctx: &mut Allocator, start: usize, n: usize) -> BlockResult<usize> {
        if n == 0 {
            return Ok(0);
        }
        if start >= self.count {
            return Err(BlockError::OutOfRange {
                index: start,
                count: self.count,
            });
        }
        let end = (start + n).min(self.count);

        if self.is_constant() || self.is_static() {
            let pod = self.ty.is_some_and(|ty| ty.is_pod) && !self.is_sparse();
            if pod && end >= self.count {
                // Truncating POD data needs no destructors and no moves, so
                // constness and staticness are not actually violated.
                let removed = self.count - start;
                self.count = start;
                return Ok(removed);
            }
            return Err(if self.is_constant() {
                BlockError::ConstViolation
            } else {
                BlockError::StaticViolation
            });
        }

        debug_assert!(self.uses() <= 1, "removing from a block shared with another holder");
        let removed = end - start;
        // SAFETY: [start, end) is initialized.
        unsafe { self.destroy_range(ctx, start, end)? };
        if end < self.count {
            // SAFETY: the tail slides left over the destroyed region.
            unsafe { self.relocate(end, start, self.count - end) };
        }
        self.count -= removed;
        if self.count == 0 {
            self.release_storage(ctx);
            self.state -= DataState::STATIC | DataState::CONSTANT;
        }
        Ok(removed)
    }

    /// Remove the first element equal to the single-element pattern.
    pub fn remove_value(&mut self, ctx: &mut Allocator, value: &Block) -> BlockResult<usize> {
        match self.find_block(value) {
            Some(index) => self.remove_at(ctx, index, 1),
            None => Ok(0),
        }
    }

    /// Drop every element past `count`.
    pub fn trim(&mut self, ctx: &mut Allocator, count: usize) -> BlockResult<()> {
        if count >= self.count {
            return Ok(());
        }
        self.remove_at(ctx, count, self.count - count).map(|_| ())
    }

    /// Push with state negotiation: try concatenation, then absorption into
    /// an empty block, then deepening. `extra_state` is merged into the
    /// result on success.
    pub fn smart_push(
        &mut self,
        ctx: &mut Allocator,
        other: &Block,
        extra_state: DataState,
        allow_concat: bool,
        allow_deepen: bool,
    ) -> BlockResult<usize> {
        if other.count == 0 {
            // Empty sources only donate their state hints.
            self.state |= (other.unconstrained_state()
                & (DataState::MISSING | DataState::FUTURE | DataState::OR))
                | extra_state;
            return Ok(0);
        }

        if allow_concat && self.is_concatable(other) {
            let at = self.count;
            let inserted = self.insert_block(ctx, other, at)?;
            self.state |= extra_state;
            return Ok(inserted);
        }

        if self.count == 0
            && self.can_fit_state(other)
            && (self.is_untyped() || other.ty.is_some_and(|ty| self.is_type(ty)))
        {
            // Absorb: become a shared shallow copy of the source.
            let constrained = self.state.contains(DataState::TYPED);
            let mut absorbed = Block::shared_from(other);
            absorbed.state |= extra_state;
            if constrained {
                absorbed.state |= DataState::TYPED;
            }
            let count = absorbed.count;
            *self = absorbed;
            return Ok(count);
        }

        if allow_deepen && !self.is_type_constrained() {
            self.deepen(ctx)?;
            self.push_inner_block(ctx, Block::shared_from(other))?;
            self.state |= extra_state;
            return Ok(1);
        }

        Err(BlockError::TypeMismatch {
            from: self.token(),
            to: other.token(),
        })
    }

    /// Copy matching elements into `output`. The output's type filters what
    /// gets gathered; hierarchy is preserved only when the output is deep.
    pub fn gather(
        &self,
        ctx: &mut Allocator,
        output: &mut Block,
        direction: Direction,
    ) -> BlockResult<usize> {
        if output.is_untyped() {
            let at = output.count;
            return output.insert_block(ctx, self, at);
        }
        gather_inner(ctx, self, output, direction)
    }

    /// Phase-filtered gather. A neutral (`Now`) deep input is permissive:
    /// it is descended into, and non-empty sub-results are pushed.
    pub fn gather_phase(
        &self,
        ctx: &mut Allocator,
        output: &mut Block,
        phase: Phase,
        direction: Direction,
    ) -> BlockResult<usize> {
        gather_phase_inner(ctx, output.ty, self, output, direction, phase)
    }

    /// Flatten unnecessarily deep nesting and drop or-ness from singleton
    /// containers. Idempotent; never changes the set of leaf elements.
    pub fn optimize(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        if self.is_or() && self.count == 1 {
            self.make_and();
        }

        while self.count == 1 && self.is_deep() {
            let fits = match self.deep_child(0) {
                Some(child) => self.can_fit_state(child),
                None => break,
            };
            if !fits {
                if let Some(child) = self.deep_child_mut(0) {
                    child.optimize(ctx)?;
                    if child.is_empty() {
                        self.reset(ctx)?;
                    }
                }
                return Ok(());
            }
            let inner = match self.deep_child_mut(0) {
                Some(child) => Block::taken_from(child),
                None => break,
            };
            self.reset(ctx)?;
            *self = inner;
        }

        if self.count > 1 && self.is_deep() {
            let mut i = 0;
            while i < self.count {
                let emptied = match self.deep_child_mut(i) {
                    Some(child) => {
                        child.optimize(ctx)?;
                        child.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.remove_at(ctx, i, 1)?;
                } else {
                    i += 1;
                }
            }
            // Dropping empty children may have exposed a singleton that can
            // still flatten.
            if self.count == 1 {
                return self.optimize(ctx);
            }
        }
        Ok(())
    }
}

fn gather_inner(
    ctx: &mut Allocator,
    input: &Block,
    output: &mut Block,
    direction: Direction,
) -> BlockResult<usize> {
    let mut gathered = 0;
    if input.is_deep() && !output.is_deep() {
        // Flatten: iterate the subpacks in the requested direction.
        match direction {
            Direction::Front => {
                for i in 0..input.count() {
                    if let Some(child) = input.deep_child(i) {
                        gathered += gather_inner(ctx, child, output, direction)?;
                    }
                }
            }
            Direction::Back => {
                for i in (0..input.count()).rev() {
                    if let Some(child) = input.deep_child(i) {
                        gathered += gather_inner(ctx, child, output, direction)?;
                    }
                }
            }
        }
        return Ok(gathered);
    }

    if output.is_concatable(input) {
        let at = output.count();
        gathered += output.insert_block(ctx, input, at)?;
    }
    Ok(gathered)
}

fn gather_phase_inner(
    ctx: &mut Allocator,
    target_ty: Option<&'static TypeDescriptor>,
    input: &Block,
    output: &mut Block,
    direction: Direction,
    phase: Phase,
) -> BlockResult<usize> {
    if input.phase() != phase {
        if input.phase() == Phase::Now && input.is_deep() {
            // Neutral phase is permissive: dig deeper and push whatever the
            // descent produces, dropping empty results.
            let mut local = Block::from_state(input.unconstrained_state(), target_ty);
            match direction {
                Direction::Front => {
                    for i in 0..input.count() {
                        if let Some(child) = input.deep_child(i) {
                            gather_phase_inner(ctx, target_ty, child, &mut local, direction, phase)?;
                        }
                    }
                }
                Direction::Back => {
                    for i in (0..input.count()).rev() {
                        if let Some(child) = input.deep_child(i) {
                            gather_phase_inner(ctx, target_ty, child, &mut local, direction, phase)?;
                        }
                    }
                }
            }
            local.set_phase(Phase::Now);
            if local.is_empty() {
                local.reset(ctx)?;
                return Ok(0);
            }
            let pushed = output.smart_push(ctx, &local, DataState::empty(), true, true)?;
            local.reset(ctx)?;
            return Ok(pushed);
        }
        return Ok(0);
    }

    if target_ty.is_none() {
        // Untyped output takes everything wholesale.
        return output.smart_push(ctx, input, DataState::empty(), true, true);
    }

    let mut local = Block::from_state(input.unconstrained_state(), target_ty);
    gather_inner(ctx, input, &mut local, direction)?;
    local.set_phase(Phase::Now);
    if local.is_empty() {
        local.reset(ctx)?;
        return Ok(0);
    }
    let at = output.count();
    let inserted = output.insert_block(ctx, &local, at)?;
    local.reset(ctx)?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_memory::Allocator;
    use tessera_reflect::Reflected as _;

    fn i32_block(ctx: &mut Allocator, values: &[i32]) -> Block {
        let mut block = Block::from_type(i32::descriptor());
        block.allocate(ctx, values.len()).unwrap();
        for (i, value) in values.iter().enumerate() {
            // SAFETY: slot i is reserved i32 storage.
            unsafe { block.at(i).cast::<i32>().write(*value) };
        }
        block.count = values.len();
        block
    }

    fn as_slice(block: &Block) -> &[i32] {
        // SAFETY: blocks built by i32_block hold initialized i32s.
        unsafe { core::slice::from_raw_parts(block.raw().cast::<i32>(), block.count()) }
    }

    #[test]
    fn insert_shifts_the_tail() {
        let mut ctx = Allocator::new();
        let mut target = i32_block(&mut ctx, &[1, 2, 5]);
        let source = i32_block(&mut ctx, &[3, 4]);

        assert_eq!(target.insert_block(&mut ctx, &source, 2).unwrap(), 2);
        assert_eq!(as_slice(&target), &[1, 2, 3, 4, 5]);

        let mut source = source;
        source.reset(&mut ctx).unwrap();
        target.reset(&mut ctx).unwrap();
    }

    #[test]
    fn remove_closes_the_gap_and_releases_when_empty() {
        let mut ctx = Allocator::new();
        let mut block = i32_block(&mut ctx, &[1, 2, 3, 4, 5]);

        assert_eq!(block.remove_at(&mut ctx, 1, 2).unwrap(), 2);
        assert_eq!(as_slice(&block), &[1, 4, 5]);

        assert_eq!(block.remove_at(&mut ctx, 0, 3).unwrap(), 3);
        assert_eq!(block.count(), 0);
        assert!(!block.is_allocated());
    }

    #[test]
    fn incompatible_insert_deepens_and_preserves_leaves() {
        let mut ctx = Allocator::new();
        let mut target = i32_block(&mut ctx, &[1, 2, 3]);
        let mut foreign = Block::from_type(u32::descriptor());
        foreign.allocate(&mut ctx, 2).unwrap();
        // SAFETY: reserved u32 slots.
        unsafe {
            foreign.at(0).cast::<u32>().write(7);
            foreign.at(1).cast::<u32>().write(8);
        }
        foreign.count = 2;

        assert_eq!(target.insert_block(&mut ctx, &foreign, usize::MAX).unwrap(), 1);
        assert!(target.is_deep());
        assert_eq!(target.count(), 2);
        assert_eq!(target.count_elements_deep(), 5);

        foreign.reset(&mut ctx).unwrap();
        target.reset(&mut ctx).unwrap();
    }

    #[test]
    fn merge_skips_duplicates() {
        let mut ctx = Allocator::new();
        let mut target = i32_block(&mut ctx, &[1, 2, 3]);
        let source = i32_block(&mut ctx, &[2, 3, 4]);

        assert_eq!(target.merge_block(&mut ctx, &source).unwrap(), 1);
        assert_eq!(as_slice(&target), &[1, 2, 3, 4]);

        let mut source = source;
        source.reset(&mut ctx).unwrap();
        target.reset(&mut ctx).unwrap();
    }

    #[test]
    fn optimize_flattens_singleton_nesting() {
        let mut ctx = Allocator::new();
        let mut inner = i32_block(&mut ctx, &[1, 2, 3]);
        let mut outer = Block::from_type(Block::descriptor());
        outer.push_inner_block(&mut ctx, Block::taken_from(&mut inner)).unwrap();
        assert!(outer.is_deep());
        assert_eq!(outer.count(), 1);

        outer.optimize(&mut ctx).unwrap();
        assert!(!outer.is_deep());
        assert_eq!(as_slice(&outer), &[1, 2, 3]);

        // A second pass must be a no-op.
        outer.optimize(&mut ctx).unwrap();
        assert_eq!(as_slice(&outer), &[1, 2, 3]);

        outer.reset(&mut ctx).unwrap();
    }

    #[test]
    fn gather_flattens_hierarchies_into_typed_output() {
        let mut ctx = Allocator::new();
        let mut left = i32_block(&mut ctx, &[1, 2]);
        let mut right = i32_block(&mut ctx, &[3, 4]);
        let mut outer = Block::from_type(Block::descriptor());
        outer
            .push_inner_block(&mut ctx, Block::taken_from(&mut left))
            .unwrap();
        outer
            .push_inner_block(&mut ctx, Block::taken_from(&mut right))
            .unwrap();

        let mut output = Block::from_type(i32::descriptor());
        let gathered = outer
            .gather(&mut ctx, &mut output, Direction::Front)
            .unwrap();
        assert_eq!(gathered, 4);
        assert_eq!(as_slice(&output), &[1, 2, 3, 4]);

        let mut reversed = Block::from_type(i32::descriptor());
        outer
            .gather(&mut ctx, &mut reversed, Direction::Back)
            .unwrap();
        assert_eq!(as_slice(&reversed), &[3, 4, 1, 2]);

        output.reset(&mut ctx).unwrap();
        reversed.reset(&mut ctx).unwrap();
        outer.reset(&mut ctx).unwrap();
    }

    #[test]
    fn phase_gather_filters_and_digs_through_neutral_depth() {
        let mut ctx = Allocator::new();
        let mut past = i32_block(&mut ctx, &[1, 2]);
        past.make_past();
        let mut future = i32_block(&mut ctx, &[9]);
        future.make_future();

        let mut outer = Block::from_type(Block::descriptor());
        outer
            .push_inner_block(&mut ctx, Block::taken_from(&mut past))
            .unwrap();
        outer
            .push_inner_block(&mut ctx, Block::taken_from(&mut future))
            .unwrap();

        // The outer block is neutral and deep, so the descent is allowed;
        // only past elements come out.
        let mut output = Block::from_type(i32::descriptor());
        outer
            .gather_phase(&mut ctx, &mut output, Phase::Past, Direction::Front)
            .unwrap();
        assert_eq!(output.count_elements_deep(), 2);

        // No future elements exist under a past filter pointed the other
        // way.
        let mut none = Block::from_type(u32::descriptor());
        let gathered = outer
            .gather_phase(&mut ctx, &mut none, Phase::Future, Direction::Front)
            .unwrap();
        assert_eq!(gathered, 0);
        assert!(none.is_empty());

        output.reset(&mut ctx).unwrap();
        none.reset(&mut ctx).unwrap();
        outer.reset(&mut ctx).unwrap();
    }

    #[test]
    fn smart_push_deepens_when_states_clash() {
        let mut ctx = Allocator::new();
        let mut target = i32_block(&mut ctx, &[1, 2]);
        target.make_or();
        target.make_past();
        let mut source = i32_block(&mut ctx, &[3]);
        source.make_future();

        // A past OR target with a future source cannot concatenate; with
        // deepening allowed it nests instead.
        let pushed = target
            .smart_push(&mut ctx, &source, DataState::empty(), true, true)
            .unwrap();
        assert_eq!(pushed, 1);
        assert!(target.is_deep());
        assert_eq!(target.count_elements_deep(), 3);

        source.reset(&mut ctx).unwrap();
        target.reset(&mut ctx).unwrap();
    }

    #[test]
    fn smart_push_absorbs_into_empty_blocks() {
        let mut ctx = Allocator::new();
        let mut target = Block::new();
        let mut source = i32_block(&mut ctx, &[7, 8]);

        // With concatenation off, an empty block absorbs the source as a
        // shared shallow copy.
        let pushed = target
            .smart_push(&mut ctx, &source, DataState::empty(), false, true)
            .unwrap();
        assert_eq!(pushed, 2);
        assert!(target.is_type(i32::descriptor()));
        assert_eq!(target.uses(), 2, "absorption shares the buffer");

        target.reset(&mut ctx).unwrap();
        source.reset(&mut ctx).unwrap();
    }

    #[test]
    fn or_branch_collapses_at_count_one() {
        let mut ctx = Allocator::new();
        let mut block = i32_block(&mut ctx, &[9]);
        block.make_or();
        block.optimize(&mut ctx).unwrap();
        assert!(!block.is_or());
        block.reset(&mut ctx).unwrap();
    }
}
