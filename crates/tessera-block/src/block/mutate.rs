//! Type mutation, deepening, and reinterpretation.

use tessera_memory::Allocator;
use tessera_reflect::{Base, Member, Reflected as _, TypeDescriptor};

use super::Block;
use crate::error::{BlockError, BlockResult};
use crate::state::DataState;

impl Block {
    /// Prepare the block to accept elements of `meta`.
    ///
    /// Untyped blocks pin the type; abstract empty blocks concretize;
    /// incompatible types deepen the block (wrapping the current contents in
    /// a single nested element) unless it is type-constrained. Returns
    /// `true` when deepening happened.
    pub fn mutate(&mut self, ctx: &mut Allocator, meta: &'static TypeDescriptor) -> BlockResult<bool> {
        let Some(ty) = self.ty else {
            self.set_type(meta, false)?;
            return Ok(false);
        };
        if ty.is(meta) {
            return Ok(false);
        }
        if ty.is_abstract && self.is_empty() && meta.casts_to(ty) {
            self.set_type(meta, false)?;
            return Ok(false);
        }
        if !self.is_insertable(meta) {
            if self.is_type_constrained() {
                return Err(BlockError::TypeConstraint {
                    from: ty.token,
                    to: meta.token,
                });
            }
            self.deepen(ctx)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Pin or change the element type.
    ///
    /// A typed block accepts a compatible type only when sparse (dense
    /// buffers would end up with the wrong destructors) and an incompatible
    /// one only while empty.
    pub fn set_type(
        &mut self,
        ty: &'static TypeDescriptor,
        constrain: bool,
    ) -> BlockResult<()> {
        match self.ty {
            None => self.ty = Some(ty),
            Some(current) if current.is(ty) => {}
            Some(current) => {
                if self.is_type_constrained() {
                    return Err(BlockError::TypeConstraint {
                        from: current.token,
                        to: ty.token,
                    });
                }
                if current.casts_to(ty) {
                    if !self.is_sparse() {
                        return Err(BlockError::TypeMismatch {
                            from: current.token,
                            to: ty.token,
                        });
                    }
                    self.ty = Some(ty);
                } else {
                    if !self.is_empty() {
                        return Err(BlockError::TypeMismatch {
                            from: current.token,
                            to: ty.token,
                        });
                    }
                    self.ty = Some(ty);
                    // The reservation was measured in old-type strides.
                    self.refresh_reserved();
                }
            }
        }
        if constrain {
            self.make_type_constrained();
        }
        Ok(())
    }

    /// Recompute `reserved` from the entry's capacity after a stride change.
    fn refresh_reserved(&mut self) {
        let stride = self.stride();
        if stride == 0 {
            return;
        }
        if let Some(entry) = self.entry {
            // SAFETY: owned entries are live while the block names them.
            self.reserved = unsafe { entry.as_ref() }.allocated_bytes() / stride;
        } else if self.raw.is_null() {
            self.reserved = 0;
        }
    }

    /// Wrap the current contents inside a single nested block, so elements
    /// of another type can be inserted alongside. The or-ness stays on the
    /// outer container.
    pub fn deepen(&mut self, ctx: &mut Allocator) -> BlockResult<()> {
        self.ensure_resizable()?;
        #[cfg(feature = "logging")]
        tracing::trace!(ty = self.token(), count = self.count, "deepening block");

        let outer_state = self.state.unconstrained() - DataState::SPARSE;
        let mut inner = Block::taken_from(self);
        inner.state -= DataState::OR;

        self.ty = Some(Block::descriptor());
        self.state = outer_state;
        self.allocate(ctx, 1)?;
        // SAFETY: slot 0 is reserved Block storage; `inner` transfers its
        // authority into the element.
        unsafe { self.at(0).cast::<Block>().write(inner) };
        self.count = 1;
        Ok(())
    }

    /// Reinterpret the contents as the type and shape of `pattern`.
    ///
    /// Succeeds when the element type has a binary-compatible base path
    /// whose stride matches the pattern's; the result is a borrowed, static,
    /// constant view over the same bytes.
    pub fn reinterpret_as(&self, pattern: &Block) -> BlockResult<Block> {
        let mine = self.ty.ok_or(BlockError::Untyped)?;
        let pattern_ty = pattern.ty.ok_or(BlockError::Untyped)?;
        if self.is_sparse() || pattern.is_sparse() {
            return Err(BlockError::TypeMismatch {
                from: mine.token,
                to: pattern_ty.token,
            });
        }
        let pattern_stride = pattern.stride();
        if pattern_stride == 0 {
            return Err(BlockError::Untyped);
        }
        let base = mine
            .compatible_base(pattern_ty)
            .ok_or(BlockError::TypeMismatch {
                from: mine.token,
                to: pattern_ty.token,
            })?;

        let total = (self.count * base.ty.size * base.count) / pattern_stride;
        let count = if pattern.is_empty() {
            total
        } else {
            (total / pattern.count) * pattern.count
        };
        Ok(Block {
            ty: pattern.ty,
            state: pattern.state | DataState::STATIC | DataState::CONSTANT,
            count,
            reserved: count,
            raw: self.raw.wrapping_add(base.offset),
            entry: None,
        })
    }

    /// The memory block corresponding to a reflected base.
    ///
    /// Binary-compatible bases map the whole buffer; other bases view the
    /// base sub-object of the first element only.
    #[must_use]
    pub fn base_view(&self, base: &Base) -> Block {
        let base_ty = (base.ty)();
        if base.binary_compatible {
            return Block {
                ty: Some(base_ty),
                state: self.state | DataState::MEMBER,
                count: self.count * base.count,
                reserved: self.count * base.count,
                raw: self.raw,
                entry: None,
            };
        }
        if self.is_empty() {
            return Block::from_state(self.state | DataState::MEMBER, Some(base_ty));
        }
        Block {
            ty: Some(base_ty),
            state: self.state | DataState::MEMBER,
            count: base.count,
            reserved: base.count,
            raw: self.raw.wrapping_add(base.offset),
            entry: None,
        }
    }

    /// The memory block corresponding to a reflected member of the first
    /// element.
    #[must_use]
    pub fn member_view(&self, member: &Member) -> Block {
        Block {
            ty: Some((member.ty)()),
            state: self.state | DataState::MEMBER,
            count: member.count,
            reserved: member.count,
            raw: self.raw.wrapping_add(member.offset),
            entry: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_memory::Allocator;

    #[test]
    fn untyped_blocks_pin_the_first_type() {
        let mut ctx = Allocator::new();
        let mut block = Block::new();
        assert!(!block.mutate(&mut ctx, i32::descriptor()).unwrap());
        assert!(block.is_type(i32::descriptor()));
    }

    #[test]
    fn constrained_blocks_refuse_foreign_types() {
        let mut ctx = Allocator::new();
        let mut block = Block::from_type(i32::descriptor());
        block.make_type_constrained();
        let result = block.mutate(&mut ctx, u32::descriptor());
        assert!(matches!(result, Err(BlockError::TypeConstraint { .. })));
    }

    #[test]
    fn incompatible_types_deepen_unconstrained_blocks() {
        let mut ctx = Allocator::new();
        let mut block = Block::from_type(i32::descriptor());
        block.allocate_constructed(&mut ctx, 3).unwrap();

        let deepened = block.mutate(&mut ctx, u32::descriptor()).unwrap();
        assert!(deepened);
        assert!(block.is_deep());
        assert_eq!(block.count(), 1);
        assert_eq!(block.count_elements_deep(), 3);

        block.reset(&mut ctx).unwrap();
    }

    #[test]
    fn reinterpretation_follows_binary_compatible_bases() {
        use once_cell::sync::OnceCell;
        use tessera_reflect::{Base, describe_pod};

        #[derive(Clone, Copy, PartialEq)]
        struct Pair {
            x: u32,
            y: u32,
        }

        impl tessera_reflect::Reflected for Pair {
            fn descriptor() -> &'static TypeDescriptor {
                static CELL: OnceCell<TypeDescriptor> = OnceCell::new();
                CELL.get_or_init(|| {
                    describe_pod::<Pair>("Pair")
                        .base(Base {
                            ty: u32::descriptor,
                            count: 2,
                            offset: 0,
                            binary_compatible: true,
                        })
                        .build()
                })
            }
        }

        let mut ctx = Allocator::new();
        let mut block = Block::from_type(Pair::descriptor());
        block.allocate(&mut ctx, 3).unwrap();
        for i in 0..3u32 {
            // SAFETY: reserved Pair slots.
            unsafe {
                block.at(i as usize).cast::<Pair>().write(Pair {
                    x: i * 2,
                    y: i * 2 + 1,
                });
            }
        }
        block.count = 3;

        let pattern = Block::from_type(u32::descriptor());
        let view = block.reinterpret_as(&pattern).unwrap();
        assert!(view.is_type(u32::descriptor()));
        assert!(view.is_static() && view.is_constant());
        assert_eq!(view.count(), 6, "three pairs view as six u32s");
        for i in 0..6 {
            let element = view.element(i);
            // SAFETY: the view aliases initialized u32s.
            assert_eq!(unsafe { *element.raw().cast::<u32>() }, i as u32);
        }

        // No binary-compatible path to an unrelated type.
        let foreign = Block::from_type(i32::descriptor());
        assert!(matches!(
            block.reinterpret_as(&foreign),
            Err(BlockError::TypeMismatch { .. })
        ));

        block.reset(&mut ctx).unwrap();
    }

    #[test]
    fn set_type_enforces_the_dense_rules() {
        let mut ctx = Allocator::new();
        let mut block = Block::from_type(i32::descriptor());
        block.allocate_constructed(&mut ctx, 2).unwrap();
        // Non-empty dense block cannot change to an incompatible type.
        assert!(matches!(
            block.set_type(u32::descriptor(), false),
            Err(BlockError::TypeMismatch { .. })
        ));
        block.reset(&mut ctx).unwrap();

        // Empty blocks may switch freely.
        let mut empty = Block::from_type(i32::descriptor());
        empty.set_type(u32::descriptor(), true).unwrap();
        assert!(empty.is_type(u32::descriptor()));
        assert!(empty.is_type_constrained());
    }
}
