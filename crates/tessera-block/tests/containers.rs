//! End-to-end container scenarios.

use tessera_block::{
    Allocator, Block, Reflected, TypedVector, UnorderedMap, UnorderedSet,
};

#[test]
fn typed_vector_grows_in_place() {
    let mut ctx = Allocator::new();
    let mut vector = TypedVector::<i32>::new();

    for value in [1, 2, 3, 4, 5] {
        vector.push(&mut ctx, value).unwrap();
    }
    let raw = vector.as_block().raw();
    for value in [6, 7, 8, 9, 10] {
        vector.push(&mut ctx, value).unwrap();
    }

    assert_eq!(vector.len(), 10);
    assert!(vector.capacity() >= 10);
    assert_eq!(
        vector.as_block().raw(),
        raw,
        "pool-backed reallocation must keep the byte pointer"
    );
    assert_eq!(vector.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

    vector.reset(&mut ctx).unwrap();
    ctx.collect_garbage();
    assert_eq!(ctx.pool_count(), 0);
}

#[test]
fn sparse_blocks_realize_shared_ownership() {
    let mut ctx = Allocator::new();

    // A dense block holding 555, built through the typed facade.
    let mut dense = TypedVector::<i32>::new();
    dense.push(&mut ctx, 555).unwrap();
    assert_eq!(dense.as_block().uses(), 1);

    // A sparse block whose single element points into the dense storage.
    let mut sparse = Block::sparse(i32::descriptor());
    // SAFETY: the pointee lives in `dense` for the whole test.
    unsafe {
        sparse
            .push_pointer(&mut ctx, dense.as_block().raw().cast_mut())
            .unwrap();
    }
    assert_eq!(dense.as_block().uses(), 2, "the cell shares ownership");

    // Copying the sparse block shares the pointee, not duplicates it.
    let mut copy = Block::sparse(i32::descriptor());
    copy.insert_block(&mut ctx, &sparse, 0).unwrap();
    assert_eq!(dense.as_block().uses(), 3);
    assert_eq!(
        copy.element_dense(0).raw(),
        dense.as_block().raw(),
        "the copy aliases the same dense storage"
    );
    // SAFETY: the cell points at the initialized 555.
    assert_eq!(unsafe { *copy.element_dense(0).raw().cast::<i32>() }, 555);

    // Dropping both sparse blocks releases exactly the shared references.
    sparse.reset(&mut ctx).unwrap();
    copy.reset(&mut ctx).unwrap();
    assert_eq!(dense.as_block().uses(), 1);

    dense.reset(&mut ctx).unwrap();
}

#[test]
fn heterogeneous_deep_compare() {
    let mut ctx = Allocator::new();

    let mut a = TypedVector::<i32>::new();
    let mut b_source = TypedVector::<i32>::new();
    let mut c = TypedVector::<u32>::new();
    for value in 1..=5 {
        a.push(&mut ctx, value).unwrap();
        b_source.push(&mut ctx, value).unwrap();
        c.push(&mut ctx, value as u32).unwrap();
    }
    // The same bytes as a plain type-erased block.
    let mut b = b_source.into_block();

    assert!(a.as_block().compare(&b), "facade and block compare equal");
    assert!(
        !a.as_block().compare(c.as_block()),
        "same bytes, different element type"
    );
    assert_eq!(
        a.as_block().hash().unwrap(),
        b.hash().unwrap(),
        "equal content hashes equal across facades"
    );

    a.reset(&mut ctx).unwrap();
    b.reset(&mut ctx).unwrap();
    c.reset(&mut ctx).unwrap();
}

const FIXTURE: [&str; 10] = [
    "VulkanLayer",
    "VulkanRenderer",
    "VulkanCamera",
    "Platform",
    "Vulkan",
    "Window",
    "VulkanLight",
    "Monitor",
    "VulkanRenderable",
    "Cursor",
];

#[test]
fn map_corner_case_removals_around_the_probe_chain() {
    let mut ctx = Allocator::new();
    let mut map = UnorderedMap::<String, String>::new();

    for name in FIXTURE {
        assert!(map.insert(&mut ctx, name.to_owned(), name.to_owned()).unwrap());
    }
    assert_eq!(map.len(), 10);
    assert!(map.validate_probes().unwrap());

    let removed: usize = [
        "VulkanRenderer",
        "VulkanCamera",
        "Vulkan",
        "VulkanRenderable",
        "VulkanLight",
        "VulkanLayer",
    ]
    .iter()
    .map(|name| map.remove_value(&mut ctx, &(*name).to_owned()).unwrap())
    .sum();

    assert_eq!(removed, 6);
    assert_eq!(map.len(), 4);
    for name in ["Platform", "Window", "Monitor", "Cursor"] {
        assert_eq!(
            map.get(&name.to_owned()).map(String::as_str),
            Some(name),
            "{name} must survive"
        );
    }
    for name in ["VulkanLayer", "VulkanRenderer", "VulkanCamera", "Vulkan"] {
        assert!(map.get(&name.to_owned()).is_none(), "{name} must be gone");
    }
    assert!(
        map.validate_probes().unwrap(),
        "the Robin-Hood invariant must hold after the removals"
    );

    map.reset(&mut ctx).unwrap();
}

#[test]
fn set_corner_case_removals_around_the_probe_chain() {
    let mut ctx = Allocator::new();
    let mut set = UnorderedSet::<String>::new();
    for name in FIXTURE {
        assert!(set.insert(&mut ctx, name.to_owned()).unwrap());
    }
    for name in [
        "VulkanRenderer",
        "VulkanCamera",
        "Vulkan",
        "VulkanRenderable",
        "VulkanLight",
        "VulkanLayer",
    ] {
        assert!(set.remove(&mut ctx, &name.to_owned()).unwrap());
    }
    assert_eq!(set.len(), 4);
    for name in ["Platform", "Window", "Monitor", "Cursor"] {
        assert!(set.contains(&name.to_owned()));
    }
    assert!(set.validate_probes().unwrap());
    set.reset(&mut ctx).unwrap();
}

#[test]
fn deepening_preserves_content() {
    let mut ctx = Allocator::new();
    let mut target = TypedVector::<i32>::new();
    for value in [1, 2, 3] {
        target.push(&mut ctx, value).unwrap();
    }
    let mut target = target.into_block();
    // Shed the facade's type constraint so the block may deepen.
    target.toggle_state(tessera_block::DataState::TYPED, false);

    let mut foreign = TypedVector::<u32>::new();
    for value in [7u32, 8] {
        foreign.push(&mut ctx, value).unwrap();
    }
    let foreign = foreign.into_block();

    let before = target.count_elements_deep();
    target.insert_block(&mut ctx, &foreign, usize::MAX).unwrap();
    assert!(target.is_deep());
    assert_eq!(
        target.count_elements_deep(),
        before + foreign.count(),
        "the flattened leaves are the concatenation"
    );

    let mut foreign = foreign;
    foreign.reset(&mut ctx).unwrap();
    target.reset(&mut ctx).unwrap();
}

#[test]
fn borrowed_views_refuse_mutation() {
    let mut ctx = Allocator::new();
    let mut vector = TypedVector::<i32>::new();
    for value in [1, 2, 3] {
        vector.push(&mut ctx, value).unwrap();
    }

    let mut view = Block::borrowed_from(vector.as_block());
    assert!(view.is_static());
    let result = view.allocate(&mut ctx, 16);
    assert!(matches!(
        result,
        Err(tessera_block::BlockError::StaticViolation)
    ));

    let mut constant = Block::borrowed_from(vector.as_block());
    constant.make_constant();
    assert!(matches!(
        constant.remove_at(&mut ctx, 0, 1),
        Err(tessera_block::BlockError::ConstViolation)
    ));

    vector.reset(&mut ctx).unwrap();
}

#[test]
fn take_authority_copies_borrowed_buffers() {
    let mut ctx = Allocator::new();
    let mut vector = TypedVector::<i32>::new();
    for value in [4, 5, 6] {
        vector.push(&mut ctx, value).unwrap();
    }

    let mut view = Block::borrowed_from(vector.as_block());
    assert!(view.entry().is_none());
    view.take_authority(&mut ctx).unwrap();
    assert!(view.entry().is_some(), "the view now owns its bytes");
    assert!(!view.is_static());
    assert_ne!(view.raw(), vector.as_block().raw());
    assert!(view.compare(vector.as_block()));

    view.reset(&mut ctx).unwrap();
    vector.reset(&mut ctx).unwrap();
}
