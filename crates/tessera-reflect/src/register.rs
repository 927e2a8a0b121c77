//! Descriptor registration: the `Reflected` trait, the builder, and the
//! thunks that lift ordinary Rust impls into type-erased function pointers.

use core::any::TypeId;
use core::hash::{Hash, Hasher};

use crate::descriptor::{
    Base, CloneFn, CompareFn, CopyAssignFn, CopyCtorFn, DefaultCtorFn, DispatchFn, DtorFn, HashFn,
    Member, MetaFn, MoveAssignFn, MoveCtorFn, ResolveFn, TypeDescriptor,
};

/// A type with an interned descriptor.
///
/// Implementations return the same `&'static TypeDescriptor` on every call,
/// typically from a `once_cell::sync::OnceCell` static:
///
/// ```
/// use once_cell::sync::OnceCell;
/// use tessera_reflect::{describe, Reflected, TypeDescriptor};
///
/// #[derive(Default, Clone, PartialEq, Hash)]
/// struct Tag(u32);
///
/// impl Reflected for Tag {
///     fn descriptor() -> &'static TypeDescriptor {
///         static CELL: OnceCell<TypeDescriptor> = OnceCell::new();
///         CELL.get_or_init(|| describe::<Tag>("Tag").build())
///     }
/// }
/// ```
pub trait Reflected: 'static {
    fn descriptor() -> &'static TypeDescriptor;
}

/// Fluent construction of a [`TypeDescriptor`].
///
/// The builder starts from the Rust type's size, alignment and id; flags and
/// function pointers are opted in explicitly so the record never promises an
/// operation the type cannot honour.
pub struct DescriptorBuilder {
    inner: TypeDescriptor,
}

impl DescriptorBuilder {
    #[must_use]
    pub fn new<T: 'static>(token: &'static str) -> Self {
        Self {
            inner: TypeDescriptor {
                id: TypeId::of::<T>(),
                token,
                size: size_of::<T>(),
                align: align_of::<T>(),
                is_pod: false,
                is_nullifiable: false,
                is_abstract: false,
                is_deep: false,
                concrete: None,
                default_ctor: None,
                copy_ctor: None,
                move_ctor: None,
                dtor: None,
                clone_in_place: None,
                clone_in_initialized: None,
                copy_assign: None,
                move_assign: None,
                compare_eq: None,
                hash: None,
                resolve: None,
                dispatch: None,
                bases: Vec::new(),
                members: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn pod(mut self) -> Self {
        self.inner.is_pod = true;
        self
    }

    #[must_use]
    pub fn nullifiable(mut self) -> Self {
        self.inner.is_nullifiable = true;
        self
    }

    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.inner.is_abstract = true;
        self
    }

    #[must_use]
    pub fn deep(mut self) -> Self {
        self.inner.is_deep = true;
        self
    }

    #[must_use]
    pub fn concrete(mut self, meta: MetaFn) -> Self {
        self.inner.concrete = Some(meta);
        self
    }

    #[must_use]
    pub fn default_ctor(mut self, f: DefaultCtorFn) -> Self {
        self.inner.default_ctor = Some(f);
        self
    }

    #[must_use]
    pub fn copy_ctor(mut self, f: CopyCtorFn) -> Self {
        self.inner.copy_ctor = Some(f);
        self
    }

    #[must_use]
    pub fn move_ctor(mut self, f: MoveCtorFn) -> Self {
        self.inner.move_ctor = Some(f);
        self
    }

    #[must_use]
    pub fn dtor(mut self, f: DtorFn) -> Self {
        self.inner.dtor = Some(f);
        self
    }

    #[must_use]
    pub fn clone_in_place(mut self, f: CloneFn) -> Self {
        self.inner.clone_in_place = Some(f);
        self
    }

    #[must_use]
    pub fn clone_in_initialized(mut self, f: CloneFn) -> Self {
        self.inner.clone_in_initialized = Some(f);
        self
    }

    #[must_use]
    pub fn copy_assign(mut self, f: CopyAssignFn) -> Self {
        self.inner.copy_assign = Some(f);
        self
    }

    #[must_use]
    pub fn move_assign(mut self, f: MoveAssignFn) -> Self {
        self.inner.move_assign = Some(f);
        self
    }

    #[must_use]
    pub fn compare_eq(mut self, f: CompareFn) -> Self {
        self.inner.compare_eq = Some(f);
        self
    }

    #[must_use]
    pub fn hash(mut self, f: HashFn) -> Self {
        self.inner.hash = Some(f);
        self
    }

    #[must_use]
    pub fn resolve(mut self, f: ResolveFn) -> Self {
        self.inner.resolve = Some(f);
        self
    }

    #[must_use]
    pub fn dispatch(mut self, f: DispatchFn) -> Self {
        self.inner.dispatch = Some(f);
        self
    }

    #[must_use]
    pub fn base(mut self, base: Base) -> Self {
        self.inner.bases.push(base);
        self
    }

    #[must_use]
    pub fn member(mut self, member: Member) -> Self {
        self.inner.members.push(member);
        self
    }

    #[must_use]
    pub fn build(self) -> TypeDescriptor {
        self.inner
    }
}

/// Builder for a plain-old-data type: byte-copyable, zero-initializable,
/// byte-comparable.
#[must_use]
pub fn describe_pod<T: Copy + 'static>(token: &'static str) -> DescriptorBuilder {
    DescriptorBuilder::new::<T>(token).pod().nullifiable()
}

/// Builder for a full-service value type: every reflected operation is
/// synthesized from the standard traits.
#[must_use]
pub fn describe<T>(token: &'static str) -> DescriptorBuilder
where
    T: Default + Clone + PartialEq + Hash + 'static,
{
    DescriptorBuilder::new::<T>(token)
        .default_ctor(default_ctor_of::<T>())
        .copy_ctor(copy_ctor_of::<T>())
        .move_ctor(move_ctor_of::<T>())
        .dtor(dtor_of::<T>())
        .clone_in_place(clone_in_place_of::<T>())
        .clone_in_initialized(clone_in_initialized_of::<T>())
        .copy_assign(copy_assign_of::<T>())
        .move_assign(move_assign_of::<T>())
        .compare_eq(compare_of::<T>())
        .hash(hash_of::<T>())
}

// ── thunks ─────────────────────────────────────────────────────────────────

pub fn default_ctor_of<T: Default>() -> DefaultCtorFn {
    |dst| {
        // SAFETY: caller passes uninitialized, aligned storage for a T.
        unsafe { dst.cast::<T>().write(T::default()) }
    }
}

pub fn copy_ctor_of<T: Clone>() -> CopyCtorFn {
    |dst, src| {
        // SAFETY: src is an initialized T; dst is uninitialized storage.
        unsafe { dst.cast::<T>().write((*src.cast::<T>()).clone()) }
    }
}

pub fn move_ctor_of<T>() -> MoveCtorFn {
    |dst, src| {
        // SAFETY: src is an initialized T that the caller treats as
        // uninitialized afterwards; dst is uninitialized storage.
        unsafe { dst.cast::<T>().write(src.cast::<T>().read()) }
    }
}

pub fn dtor_of<T>() -> DtorFn {
    |target| {
        // SAFETY: target is an initialized T.
        unsafe { core::ptr::drop_in_place(target.cast::<T>()) }
    }
}

pub fn clone_in_place_of<T: Clone>() -> CloneFn {
    |src, dst| {
        // SAFETY: src is an initialized T; dst is uninitialized storage.
        unsafe { dst.cast::<T>().write((*src.cast::<T>()).clone()) }
    }
}

pub fn clone_in_initialized_of<T: Clone>() -> CloneFn {
    |src, dst| {
        // SAFETY: both point to initialized Ts.
        unsafe { (*src.cast::<T>()).clone_into(&mut *dst.cast::<T>()) }
    }
}

pub fn copy_assign_of<T: Clone>() -> CopyAssignFn {
    |dst, src| {
        // SAFETY: both point to initialized Ts.
        unsafe { (*src.cast::<T>()).clone_into(&mut *dst.cast::<T>()) }
    }
}

pub fn move_assign_of<T>() -> MoveAssignFn {
    |dst, src| {
        // SAFETY: both point to initialized Ts; src is re-initialized by the
        // swap, so its later destruction stays sound.
        unsafe { core::ptr::swap(dst.cast::<T>(), src.cast::<T>()) }
    }
}

pub fn compare_of<T: PartialEq>() -> CompareFn {
    |lhs, rhs| {
        // SAFETY: both point to initialized Ts.
        unsafe { *lhs.cast::<T>() == *rhs.cast::<T>() }
    }
}

pub fn hash_of<T: Hash>() -> HashFn {
    |target| {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        // SAFETY: target points to an initialized T.
        unsafe { (*target.cast::<T>()).hash(&mut hasher) };
        hasher.finish()
    }
}

// ── primitive registrations ────────────────────────────────────────────────

macro_rules! reflect_primitive {
    ($($ty:ty => $token:literal),+ $(,)?) => {$(
        impl Reflected for $ty {
            fn descriptor() -> &'static TypeDescriptor {
                static CELL: once_cell::sync::OnceCell<TypeDescriptor> =
                    once_cell::sync::OnceCell::new();
                CELL.get_or_init(|| {
                    describe::<$ty>($token).pod().nullifiable().build()
                })
            }
        }
    )+};
}

reflect_primitive! {
    i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64", i128 => "i128",
    u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64", u128 => "u128",
    isize => "isize", usize => "usize",
    bool => "bool", char => "char",
}

macro_rules! reflect_float {
    ($($ty:ty => $token:literal),+ $(,)?) => {$(
        impl Reflected for $ty {
            fn descriptor() -> &'static TypeDescriptor {
                static CELL: once_cell::sync::OnceCell<TypeDescriptor> =
                    once_cell::sync::OnceCell::new();
                CELL.get_or_init(|| {
                    // No reflected hash: float hashing is a policy decision
                    // for higher layers.
                    DescriptorBuilder::new::<$ty>($token)
                        .pod()
                        .nullifiable()
                        .default_ctor(default_ctor_of::<$ty>())
                        .copy_ctor(copy_ctor_of::<$ty>())
                        .move_ctor(move_ctor_of::<$ty>())
                        .clone_in_place(clone_in_place_of::<$ty>())
                        .clone_in_initialized(clone_in_initialized_of::<$ty>())
                        .copy_assign(copy_assign_of::<$ty>())
                        .move_assign(move_assign_of::<$ty>())
                        .compare_eq(compare_of::<$ty>())
                        .build()
                })
            }
        }
    )+};
}

reflect_float! { f32 => "f32", f64 => "f64" }

/// Strings are the canonical non-trivial type: heap-owning, droppable, and
/// fully serviced by the standard traits.
impl Reflected for String {
    fn descriptor() -> &'static TypeDescriptor {
        static CELL: once_cell::sync::OnceCell<TypeDescriptor> = once_cell::sync::OnceCell::new();
        CELL.get_or_init(|| describe::<String>("String").build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_interned_once() {
        assert!(core::ptr::eq(i32::descriptor(), i32::descriptor()));
        assert!(!core::ptr::eq(
            i32::descriptor() as *const TypeDescriptor,
            u32::descriptor() as *const TypeDescriptor,
        ));
    }

    #[test]
    fn primitive_records_are_complete() {
        let ty = i32::descriptor();
        assert_eq!(ty.size, 4);
        assert_eq!(ty.align, 4);
        assert!(ty.is_pod && ty.is_nullifiable);
        assert!(ty.default_ctor.is_some());
        assert!(ty.compare_eq.is_some());
        assert!(ty.hash.is_some());
        assert!(ty.resolve.is_none());
    }

    #[test]
    fn identity_is_by_type_id() {
        assert!(i32::descriptor().is(i32::descriptor()));
        assert!(!i32::descriptor().is(u32::descriptor()));
        assert!(i32::descriptor().casts_to(i32::descriptor()));
        assert!(!i32::descriptor().casts_to(u32::descriptor()));
    }

    #[test]
    fn thunks_round_trip_a_value() {
        let ty = i32::descriptor();
        let mut storage = 0i32;
        let source = 555i32;

        let copy = ty.copy_ctor.unwrap();
        // SAFETY: both pointers are valid, aligned i32 addresses.
        unsafe {
            copy(
                core::ptr::from_mut(&mut storage).cast(),
                core::ptr::from_ref(&source).cast(),
            );
        }
        assert_eq!(storage, 555);

        let eq = ty.compare_eq.unwrap();
        // SAFETY: as above.
        assert!(unsafe {
            eq(
                core::ptr::from_ref(&storage).cast(),
                core::ptr::from_ref(&source).cast(),
            )
        });

        let hash = ty.hash.unwrap();
        // SAFETY: as above.
        let lhs = unsafe { hash(core::ptr::from_ref(&storage).cast()) };
        // SAFETY: as above.
        let rhs = unsafe { hash(core::ptr::from_ref(&source).cast()) };
        assert_eq!(lhs, rhs);
    }

    #[derive(Clone, Copy, PartialEq)]
    struct Quad([f32; 4]);

    impl Reflected for Quad {
        fn descriptor() -> &'static TypeDescriptor {
            static CELL: once_cell::sync::OnceCell<TypeDescriptor> =
                once_cell::sync::OnceCell::new();
            CELL.get_or_init(|| {
                describe_pod::<Quad>("Quad")
                    .base(Base {
                        ty: f32::descriptor,
                        count: 4,
                        offset: 0,
                        binary_compatible: true,
                    })
                    .build()
            })
        }
    }

    #[test]
    fn binary_compatible_bases_accumulate_counts() {
        let quad = Quad::descriptor();
        assert!(quad.casts_to(f32::descriptor()));
        let view = quad.compatible_base(f32::descriptor()).unwrap();
        assert_eq!(view.count, 4);
        assert_eq!(view.offset, 0);
        assert!(quad.casts_to_counted(f32::descriptor(), 4));
        assert!(!quad.casts_to_counted(f32::descriptor(), 5));
        assert!(quad.has_base(f32::descriptor()));
    }
}
