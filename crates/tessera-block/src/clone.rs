//! The deep-copy engine.
//!
//! Cloning walks pointer graphs and nested hierarchies, producing a fully
//! owned duplicate: sparse cells are resolved to their dynamic types and
//! cloned recursively, nested blocks clone their children, dense data goes
//! through `clone_in_place` / `clone_in_initialized` / `memcpy`, in that
//! order of preference.

use tessera_memory::Allocator;

use crate::block::Block;
use crate::error::{BlockError, BlockResult};
use crate::sparse::SparseCell;

impl Block {
    /// Deep-copy into a fresh, owned block.
    ///
    /// The clone carries the unconstrained state (`STATIC` and `CONSTANT`
    /// are cleared, as is the type constraint); its buffer never aliases the
    /// source.
    pub fn clone_in(&self, ctx: &mut Allocator) -> BlockResult<Block> {
        let mut result = Block::new();
        self.clone_into(ctx, &mut result)?;
        Ok(result)
    }

    fn clone_into(&self, ctx: &mut Allocator, result: &mut Block) -> BlockResult<()> {
        if let Some(ty) = self.ty() {
            result.set_type(ty, false)?;
        }
        result.state |= self.unconstrained_state();
        if !self.is_allocated() || self.is_empty() {
            return Ok(());
        }
        let ty = self.ty().expect("allocated blocks are typed");

        if self.is_sparse() {
            // Clone the data behind every valid pointer.
            result.allocate(ctx, self.count())?;
            result.count = self.count();
            for i in 0..self.count() {
                let cell = self.cell(i);
                if cell.is_null() {
                    // SAFETY: reserved cell slot.
                    unsafe { result.cells().add(i).write(SparseCell::null()) };
                    continue;
                }
                let from = self.element_resolved(i);
                let mut to = Block::new();
                from.clone_into(ctx, &mut to)?;
                // The fresh block's authority transfers into the cell.
                // SAFETY: reserved cell slot.
                unsafe {
                    result.cells().add(i).write(SparseCell {
                        ptr: to.raw,
                        entry: to.entry,
                    });
                }
            }
            return Ok(());
        }

        if ty.is_deep {
            // Nested blocks clone their children recursively.
            result.allocate(ctx, self.count())?;
            for i in 0..self.count() {
                let cloned = match self.deep_child(i) {
                    Some(child) => child.clone_in(ctx)?,
                    None => Block::new(),
                };
                // SAFETY: reserved Block slot.
                unsafe { result.at(i).cast::<Block>().write(cloned) };
            }
            result.count = self.count();
            return Ok(());
        }

        if ty.resolve.is_none() {
            if let Some(clone_fn) = ty.clone_in_place {
                result.allocate(ctx, self.count())?;
                for i in 0..self.count() {
                    // SAFETY: source initialized, destination reserved.
                    unsafe { clone_fn(self.at(i).cast_const(), result.at(i)) };
                }
                result.count = self.count();
            } else if let Some(clone_fn) = ty.clone_in_initialized {
                result.allocate_inner(ctx, self.count(), true, false)?;
                for i in 0..self.count() {
                    // SAFETY: both sides initialized.
                    unsafe { clone_fn(self.at(i).cast_const(), result.at(i)) };
                }
            } else if ty.is_pod {
                result.allocate(ctx, self.count())?;
                // SAFETY: POD contents are plain bytes; fresh buffers never
                // alias their source.
                unsafe {
                    core::ptr::copy_nonoverlapping(self.raw(), result.raw, self.byte_size());
                }
                result.count = self.count();
            } else {
                return Err(BlockError::NoClone { ty: ty.token });
            }
            return Ok(());
        }

        // Resolvable dense data: clone each element at its actual dynamic
        // type and let insertion reconcile the result (deepening when the
        // dynamic types diverge).
        for i in 0..self.count() {
            let from = self.element_resolved(i);
            let mut to = from.clone_in(ctx)?;
            let at = result.count();
            result.insert_block_move(ctx, &mut to, at)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_memory::Allocator;
    use tessera_reflect::Reflected as _;

    fn block_of(ctx: &mut Allocator, values: &[i32]) -> Block {
        let mut block = Block::from_type(i32::descriptor());
        block.allocate(ctx, values.len().max(1)).unwrap();
        for (i, value) in values.iter().enumerate() {
            // SAFETY: reserved i32 slots.
            unsafe { block.at(i).cast::<i32>().write(*value) };
        }
        block.count = values.len();
        block
    }

    #[test]
    fn clones_compare_equal_but_never_alias() {
        let mut ctx = Allocator::new();
        let mut origin = block_of(&mut ctx, &[1, 2, 3, 4, 5]);
        let mut copy = origin.clone_in(&mut ctx).unwrap();

        assert!(origin.compare(&copy));
        assert_eq!(origin.hash().unwrap(), copy.hash().unwrap());
        assert_ne!(origin.raw(), copy.raw());

        origin.reset(&mut ctx).unwrap();
        copy.reset(&mut ctx).unwrap();
    }

    #[test]
    fn clones_shed_constraints() {
        let mut ctx = Allocator::new();
        let mut origin = block_of(&mut ctx, &[9]);
        origin.make_constant();
        origin.make_type_constrained();

        let mut copy = origin.clone_in(&mut ctx).unwrap();
        assert!(!copy.is_constant());
        assert!(!copy.is_type_constrained());

        origin.state -= crate::DataState::CONSTANT;
        origin.reset(&mut ctx).unwrap();
        copy.reset(&mut ctx).unwrap();
    }

    #[test]
    fn deep_blocks_clone_their_children() {
        let mut ctx = Allocator::new();
        let mut inner_a = block_of(&mut ctx, &[1, 2]);
        let mut inner_b = block_of(&mut ctx, &[3]);

        let mut outer = Block::from_type(Block::descriptor());
        outer
            .push_inner_block(&mut ctx, Block::taken_from(&mut inner_a))
            .unwrap();
        outer
            .push_inner_block(&mut ctx, Block::taken_from(&mut inner_b))
            .unwrap();

        let mut copy = outer.clone_in(&mut ctx).unwrap();
        assert!(outer.compare(&copy));
        assert_eq!(copy.count_elements_deep(), 3);
        assert_ne!(
            copy.deep_child(0).unwrap().raw(),
            outer.deep_child(0).unwrap().raw(),
            "children must not alias"
        );

        outer.reset(&mut ctx).unwrap();
        copy.reset(&mut ctx).unwrap();
    }
}
