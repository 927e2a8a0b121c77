//! Property tests over the container invariants.

use proptest::prelude::*;
use tessera_block::{Allocator, Block, Reflected, TypedVector, UnorderedSet};

fn vector_of(ctx: &mut Allocator, values: &[i32]) -> TypedVector<i32> {
    let mut vector = TypedVector::new();
    for &value in values {
        vector.push(ctx, value).unwrap();
    }
    vector
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn clone_round_trips(values in prop::collection::vec(any::<i32>(), 0..64)) {
        let mut ctx = Allocator::new();
        let mut origin = vector_of(&mut ctx, &values).into_block();
        let mut copy = origin.clone_in(&mut ctx).unwrap();

        prop_assert!(origin.compare(&copy));
        prop_assert_eq!(origin.hash().unwrap(), copy.hash().unwrap());
        if !values.is_empty() {
            prop_assert_ne!(origin.raw(), copy.raw());
        }

        origin.reset(&mut ctx).unwrap();
        copy.reset(&mut ctx).unwrap();
        ctx.collect_garbage();
        prop_assert_eq!(ctx.pool_count(), 0);
    }

    #[test]
    fn optimize_is_idempotent(values in prop::collection::vec(any::<i32>(), 1..32)) {
        let mut ctx = Allocator::new();

        // A singleton nesting around the values; optimize must flatten it
        // and then change nothing further.
        let inner = vector_of(&mut ctx, &values).into_block();
        let mut outer = Block::from_type(Block::descriptor());
        let mut inner = inner;
        outer.insert_block_move(&mut ctx, &mut inner, 0).unwrap();

        outer.optimize(&mut ctx).unwrap();
        let once_leaves = outer.count_elements_deep();
        let once_hash = outer.hash().unwrap();

        outer.optimize(&mut ctx).unwrap();
        prop_assert_eq!(outer.count_elements_deep(), once_leaves);
        prop_assert_eq!(outer.hash().unwrap(), once_hash);
        prop_assert_eq!(once_leaves, values.len());

        outer.reset(&mut ctx).unwrap();
    }

    #[test]
    fn deepening_concatenates_leaves(
        base in prop::collection::vec(any::<i32>(), 1..16),
        extra in prop::collection::vec(any::<u32>(), 1..16),
    ) {
        let mut ctx = Allocator::new();
        let mut target = vector_of(&mut ctx, &base).into_block();
        target.toggle_state(tessera_block::DataState::TYPED, false);

        let mut foreign = TypedVector::<u32>::new();
        for &value in &extra {
            foreign.push(&mut ctx, value).unwrap();
        }
        let mut foreign = foreign.into_block();

        target.insert_block_move(&mut ctx, &mut foreign, usize::MAX).unwrap();
        prop_assert!(target.is_deep());
        prop_assert_eq!(target.count_elements_deep(), base.len() + extra.len());

        target.reset(&mut ctx).unwrap();
    }

    #[test]
    fn hash_sets_mirror_a_reference_model(ops in prop::collection::vec(
        (any::<bool>(), 0i64..64), 1..128,
    )) {
        let mut ctx = Allocator::new();
        let mut set = UnorderedSet::<i64>::new();
        let mut model = std::collections::HashSet::new();

        for (insert, value) in ops {
            if insert {
                prop_assert_eq!(
                    set.insert(&mut ctx, value).unwrap(),
                    model.insert(value),
                );
            } else {
                prop_assert_eq!(
                    set.remove(&mut ctx, &value).unwrap(),
                    model.remove(&value),
                );
            }
            prop_assert_eq!(set.len(), model.len());
        }

        prop_assert!(set.validate_probes().unwrap());
        for value in 0..64 {
            prop_assert_eq!(set.contains(&value), model.contains(&value));
        }

        set.reset(&mut ctx).unwrap();
    }

    #[test]
    fn facade_and_block_hash_identically(values in prop::collection::vec(any::<i32>(), 0..32)) {
        let mut ctx = Allocator::new();
        let vector = vector_of(&mut ctx, &values);
        let facade_hash = vector.as_block().hash().unwrap();
        let mut block = vector.into_block();
        prop_assert_eq!(block.hash().unwrap(), facade_hash);
        block.reset(&mut ctx).unwrap();
    }
}
