//! # tessera-reflect
//!
//! Frozen reflection records for the Tessera container stack.
//!
//! A [`TypeDescriptor`] is produced once per type, interned for the lifetime
//! of the process, and never mutated afterwards. The containers drive every
//! type-erased operation (construction, destruction, comparison, hashing,
//! cloning, dynamic-type resolution) through the optional function pointers
//! a descriptor carries; a missing pointer simply makes the corresponding
//! operation unavailable for that type.
//!
//! Descriptors are compared by identity and hashed by their stable
//! [`core::any::TypeId`].
//!
//! ```
//! use tessera_reflect::Reflected;
//!
//! let ty = i32::descriptor();
//! assert!(ty.is_pod);
//! assert_eq!(ty.size, 4);
//! assert!(ty.casts_to(i32::descriptor()));
//! ```

#![allow(unsafe_code)] // the synthesized vtable thunks dereference raw pointers

mod descriptor;
mod register;

pub use descriptor::{
    Base, BaseView, CloneFn, CompareFn, CopyAssignFn, CopyCtorFn, DefaultCtorFn, DispatchFn,
    DtorFn, HashFn, Member, MetaFn, MoveAssignFn, MoveCtorFn, Resolved, ResolveFn, TypeDescriptor,
};
pub use register::{
    DescriptorBuilder, Reflected, clone_in_initialized_of, clone_in_place_of, compare_of,
    copy_assign_of, copy_ctor_of, default_ctor_of, describe, describe_pod, dtor_of, hash_of,
    move_assign_of, move_ctor_of,
};
