//! The frozen descriptor record and its queries.

use core::any::TypeId;

/// Placement default-construction: `dst` points to uninitialized,
/// properly aligned storage.
pub type DefaultCtorFn = unsafe fn(dst: *mut u8);
/// Placement copy-construction from `src` into uninitialized `dst`.
pub type CopyCtorFn = unsafe fn(dst: *mut u8, src: *const u8);
/// Placement move-construction; `src` is uninitialized afterwards.
pub type MoveCtorFn = unsafe fn(dst: *mut u8, src: *mut u8);
/// In-place destruction.
pub type DtorFn = unsafe fn(target: *mut u8);
/// Clone `src` into uninitialized `dst`.
pub type CloneFn = unsafe fn(src: *const u8, dst: *mut u8);
/// Assign a copy of `src` over the initialized value at `dst`.
pub type CopyAssignFn = unsafe fn(dst: *mut u8, src: *const u8);
/// Move-assign `src` over the initialized value at `dst`.
pub type MoveAssignFn = unsafe fn(dst: *mut u8, src: *mut u8);
/// Reflected equality.
pub type CompareFn = unsafe fn(lhs: *const u8, rhs: *const u8) -> bool;
/// Reflected hash.
pub type HashFn = unsafe fn(target: *const u8) -> u64;
/// Report the actual dynamic type of an instance.
pub type ResolveFn = unsafe fn(target: *const u8) -> Resolved;
/// User-level verb dispatch; opaque to the containers.
pub type DispatchFn = unsafe fn(target: *mut u8, verb: *mut ());
/// Lazy descriptor reference; breaks cycles between mutually-referring
/// types.
pub type MetaFn = fn() -> &'static TypeDescriptor;

/// A dynamic-type view reported by a [`ResolveFn`]: the most concrete
/// descriptor of the instance plus the address where that view starts.
#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub ty: &'static TypeDescriptor,
    pub ptr: *const u8,
}

/// A reflected base of a type.
#[derive(Debug, Clone, Copy)]
pub struct Base {
    pub ty: MetaFn,
    /// Number of base instances that fit in the derived type.
    pub count: usize,
    /// Byte offset of the base inside the derived type.
    pub offset: usize,
    /// Whether the base is binary-mapped to the derived type, allowing the
    /// seamless reinterpretation of one as the other.
    pub binary_compatible: bool,
}

/// A reflected member variable.
#[derive(Debug, Clone, Copy)]
pub struct Member {
    pub ty: MetaFn,
    /// Number of elements (arrays reflect as one member with a count).
    pub count: usize,
    /// Byte offset inside the owner.
    pub offset: usize,
    pub name: &'static str,
    /// Optional trait tag interpreted by higher layers.
    pub trait_tag: Option<&'static str>,
}

/// A base resolved through [`TypeDescriptor::compatible_base`]: the flat
/// view parameters accumulated along a binary-compatible path.
#[derive(Debug, Clone, Copy)]
pub struct BaseView {
    pub ty: &'static TypeDescriptor,
    /// Base instances per derived instance, multiplied along the path.
    pub count: usize,
    pub offset: usize,
}

/// Frozen reflection record.
///
/// Produced by the registration layer (see [`crate::Reflected`]), interned
/// per type, and never mutated. Any optional function pointer may be absent;
/// the containers fail with the matching `No*` error when an absent
/// operation is required.
#[derive(Debug)]
pub struct TypeDescriptor {
    /// Stable identity.
    pub id: TypeId,
    /// Human-readable token, used in diagnostics.
    pub token: &'static str,
    /// Element footprint in bytes.
    pub size: usize,
    pub align: usize,
    /// May be byte-copied and byte-compared.
    pub is_pod: bool,
    /// Default construction is equivalent to zeroing the bytes.
    pub is_nullifiable: bool,
    /// Cannot be instantiated directly.
    pub is_abstract: bool,
    /// The type is itself a type-erased block; containers of it are nested
    /// hierarchies and are iterated per element.
    pub is_deep: bool,
    /// Default concretization allocated in place of an abstract type.
    pub concrete: Option<MetaFn>,

    pub default_ctor: Option<DefaultCtorFn>,
    pub copy_ctor: Option<CopyCtorFn>,
    pub move_ctor: Option<MoveCtorFn>,
    pub dtor: Option<DtorFn>,
    pub clone_in_place: Option<CloneFn>,
    pub clone_in_initialized: Option<CloneFn>,
    pub copy_assign: Option<CopyAssignFn>,
    pub move_assign: Option<MoveAssignFn>,
    pub compare_eq: Option<CompareFn>,
    pub hash: Option<HashFn>,
    pub resolve: Option<ResolveFn>,
    pub dispatch: Option<DispatchFn>,

    pub bases: Vec<Base>,
    pub members: Vec<Member>,
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDescriptor {}

impl core::hash::Hash for TypeDescriptor {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl TypeDescriptor {
    /// Exact identity check.
    #[inline]
    #[must_use]
    pub fn is(&self, other: &TypeDescriptor) -> bool {
        self.id == other.id
    }

    /// Whether this type can be interpreted as `other`: identity, or any
    /// (transitive) base relation.
    #[must_use]
    pub fn casts_to(&self, other: &TypeDescriptor) -> bool {
        if self.is(other) {
            return true;
        }
        self.bases.iter().any(|base| (base.ty)().casts_to(other))
    }

    /// Whether this type can be interpreted as `count` instances of `other`
    /// through a binary-compatible path.
    #[must_use]
    pub fn casts_to_counted(&'static self, other: &TypeDescriptor, count: usize) -> bool {
        self.compatible_base(other)
            .is_some_and(|view| view.count >= count)
            || (count == 1 && self.is(other))
    }

    /// Find a binary-compatible base path to `other`, accumulating the count
    /// multiplier and byte offset along the way.
    ///
    /// Descriptors are interned, so the receiver is always `'static`.
    #[must_use]
    pub fn compatible_base(&'static self, other: &TypeDescriptor) -> Option<BaseView> {
        if self.is(other) {
            return Some(BaseView {
                ty: self,
                count: 1,
                offset: 0,
            });
        }
        for base in &self.bases {
            if !base.binary_compatible {
                continue;
            }
            let base_ty = (base.ty)();
            if let Some(inner) = base_ty.compatible_base(other) {
                return Some(BaseView {
                    ty: inner.ty,
                    count: base.count * inner.count,
                    offset: base.offset + inner.offset,
                });
            }
        }
        None
    }

    /// Whether `other` appears anywhere in the (transitive) base list.
    #[must_use]
    pub fn has_base(&self, other: &TypeDescriptor) -> bool {
        self.bases.iter().any(|base| {
            let base_ty = (base.ty)();
            base_ty.is(other) || base_ty.has_base(other)
        })
    }

    /// The concretization used when instantiating this type: `concrete` for
    /// abstract types, the type itself otherwise.
    #[must_use]
    pub fn concretized(&'static self) -> &'static TypeDescriptor {
        match self.concrete {
            Some(meta) => meta(),
            None => self,
        }
    }
}
