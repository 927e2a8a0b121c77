//! Reflection-driven deep comparison.
//!
//! Comparison never allocates and never touches refcounts, so it needs no
//! allocator context. The strategy ladder mirrors the construction engine:
//! cheap structural checks first, then the reflected equality operator, then
//! byte comparison for POD, and finally a recursive walk over bases and
//! members.

use crate::block::Block;

impl Block {
    /// Whether the relevant states match; constraint bits are ignored.
    #[must_use]
    pub fn compare_states(&self, other: &Block) -> bool {
        self.unconstrained_state() == other.unconstrained_state()
    }

    /// Deep equality with dynamic-type resolution.
    #[must_use]
    pub fn compare(&self, other: &Block) -> bool {
        self.compare_inner(other, true)
    }

    pub(crate) fn compare_inner(&self, other: &Block, resolve: bool) -> bool {
        if self.count() != other.count() {
            return false;
        }
        if self.ty() != other.ty() && (self.is_untyped() || other.is_untyped()) {
            return false;
        }
        if !self.compare_states(other) {
            return false;
        }
        if self.ty() == other.ty() && core::ptr::eq(self.raw(), other.raw()) {
            return true;
        }
        let (Some(mine), Some(theirs)) = (self.ty(), other.ty()) else {
            // Both untyped with equal (zero) counts.
            return true;
        };
        if !mine.casts_to(theirs) {
            return false;
        }

        if let Some(equals) = mine.compare_eq {
            // Reflected equality, element by element, with both sides
            // resolved to their dynamic types first.
            for i in 0..self.count() {
                let lhs = if resolve { self.element_resolved(i) } else { self.element(i) };
                let rhs = if resolve { other.element_resolved(i) } else { other.element(i) };
                if lhs.ty() != rhs.ty() {
                    return false;
                }
                if core::ptr::eq(lhs.raw(), rhs.raw()) {
                    continue;
                }
                if lhs.raw().is_null() || rhs.raw().is_null() {
                    return false;
                }
                // SAFETY: both sides are initialized single elements of the
                // same type.
                if !unsafe { equals(lhs.raw(), rhs.raw()) } {
                    return false;
                }
            }
            return true;
        }

        if mine.is_pod && theirs.is_pod && mine.size == theirs.size && !self.is_sparse() {
            // SAFETY: POD contents are plain initialized bytes.
            let lhs = unsafe { core::slice::from_raw_parts(self.raw(), self.byte_size()) };
            // SAFETY: as above.
            let rhs = unsafe { core::slice::from_raw_parts(other.raw(), other.byte_size()) };
            return lhs == rhs;
        }

        // Slowest path: compare every element through its bases and members.
        let mut compared = 0usize;
        for i in 0..self.count() {
            let lhs = if resolve { self.element_resolved(i) } else { self.element(i) };
            let rhs = if resolve { other.element_resolved(i) } else { other.element(i) };
            if !lhs.compare_members(&rhs, &mut compared) {
                return false;
            }
        }
        true
    }

    /// Compare the reflected bases and members of two single-element dense
    /// views. `compared` counts the members actually checked.
    #[must_use]
    pub fn compare_members(&self, other: &Block, compared: &mut usize) -> bool {
        let Some(ty) = self.ty() else {
            return other.is_untyped();
        };

        // Nested blocks compare as whole containers.
        if ty.is_deep {
            *compared += 1;
            // SAFETY: deep dense elements are Block values.
            let lhs = unsafe { &*self.raw().cast::<Block>() };
            // SAFETY: as above.
            let rhs = unsafe { &*other.raw().cast::<Block>() };
            return lhs.compare(rhs);
        }

        for base in &ty.bases {
            let base_ty = (base.ty)();
            if base_ty.size == 0 {
                continue;
            }
            *compared += 1;
            let lhs = self.base_view(base);
            let rhs = other.base_view(base);
            if !lhs.compare_inner(&rhs, false) {
                return false;
            }
        }

        for member in &ty.members {
            *compared += 1;
            let member_ty = (member.ty)();
            if member_ty.is_deep {
                // SAFETY: the member view points at a Block value.
                let lhs = unsafe { &*self.member_view(member).raw().cast::<Block>() };
                // SAFETY: as above.
                let rhs = unsafe { &*other.member_view(member).raw().cast::<Block>() };
                if !lhs.compare(rhs) {
                    return false;
                }
            } else {
                let lhs = self.member_view(member);
                let rhs = other.member_view(member);
                if !lhs.compare(&rhs) {
                    return false;
                }
            }
        }
        true
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other)
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
    fn equal_content_compares_equal() {
        let mut ctx = Allocator::new();
        let mut a = block_of(&mut ctx, &[1, 2, 3, 4, 5]);
        let mut b = block_of(&mut ctx, &[1, 2, 3, 4, 5]);
        assert!(a.compare(&b));
        assert_eq!(a, b);

        a.reset(&mut ctx).unwrap();
        b.reset(&mut ctx).unwrap();
    }

    #[test]
    fn count_and_type_mismatches_fail_fast() {
        let mut ctx = Allocator::new();
        let mut a = block_of(&mut ctx, &[1, 2, 3]);
        let mut b = block_of(&mut ctx, &[1, 2]);
        assert!(!a.compare(&b));

        let mut c = Block::from_type(u32::descriptor());
        c.allocate(&mut ctx, 3).unwrap();
        // SAFETY: reserved u32 slots.
        unsafe {
            for i in 0..3 {
                c.at(i).cast::<u32>().write((i + 1) as u32);
            }
        }
        c.count = 3;
        assert!(!a.compare(&c), "same bytes, different type");

        a.reset(&mut ctx).unwrap();
        b.reset(&mut ctx).unwrap();
        c.reset(&mut ctx).unwrap();
    }

    #[test]
    fn state_differences_matter_but_constness_does_not() {
        let mut ctx = Allocator::new();
        let mut a = block_of(&mut ctx, &[7]);
        let mut b = block_of(&mut ctx, &[7]);
        b.make_constant();
        assert!(a.compare(&b), "constness is ignored");
        b.make_or();
        // An OR singleton still differs in state.
        assert!(!a.compare(&b));

        a.reset(&mut ctx).unwrap();
        b.state -= crate::DataState::CONSTANT;
        b.reset(&mut ctx).unwrap();
    }
}
