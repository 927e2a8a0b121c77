//! Standalone error types for tessera-block.

use tessera_memory::MemoryError;
use thiserror::Error;

/// Result alias for block operations.
pub type BlockResult<T> = Result<T, BlockError>;

/// Container errors.
///
/// The `No*` variants mean the reflection record lacks an operation the
/// request needs; they carry the offending type's token for diagnostics.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("attempt to resize or move a borrowed (static) block")]
    StaticViolation,

    #[error("attempt to mutate a constant block")]
    ConstViolation,

    #[error("type-constrained block refuses to change from {from} to {to}")]
    TypeConstraint {
        from: &'static str,
        to: &'static str,
    },

    #[error("{from} cannot be interpreted as {to}")]
    TypeMismatch {
        from: &'static str,
        to: &'static str,
    },

    #[error("cannot instantiate abstract type {ty}")]
    AbstractInstantiation { ty: &'static str },

    #[error("operation requires a typed block")]
    Untyped,

    #[error("no copy constructor reflected for {ty}")]
    NoCopyCtor { ty: &'static str },

    #[error("no move constructor reflected for {ty}")]
    NoMoveCtor { ty: &'static str },

    #[error("no destructor reflected for {ty}")]
    NoDtor { ty: &'static str },

    #[error("no clone operation reflected for {ty}")]
    NoClone { ty: &'static str },

    #[error("no default constructor reflected for {ty}")]
    NoDefaultCtor { ty: &'static str },

    #[error("no hash operation reflected for {ty}")]
    NoHash { ty: &'static str },

    #[error("no comparison reflected for {ty}")]
    NoCompare { ty: &'static str },

    #[error("index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl BlockError {
    /// Error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StaticViolation => "BLK:STATE:STATIC",
            Self::ConstViolation => "BLK:STATE:CONST",
            Self::TypeConstraint { .. } => "BLK:TYPE:CONSTRAINT",
            Self::TypeMismatch { .. } => "BLK:TYPE:MISMATCH",
            Self::AbstractInstantiation { .. } => "BLK:TYPE:ABSTRACT",
            Self::Untyped => "BLK:TYPE:NONE",
            Self::NoCopyCtor { .. } => "BLK:REFLECT:COPY",
            Self::NoMoveCtor { .. } => "BLK:REFLECT:MOVE",
            Self::NoDtor { .. } => "BLK:REFLECT:DTOR",
            Self::NoClone { .. } => "BLK:REFLECT:CLONE",
            Self::NoDefaultCtor { .. } => "BLK:REFLECT:DEFAULT",
            Self::NoHash { .. } => "BLK:REFLECT:HASH",
            Self::NoCompare { .. } => "BLK:REFLECT:COMPARE",
            Self::OutOfRange { .. } => "BLK:ACCESS:RANGE",
            Self::Memory(inner) => inner.code(),
        }
    }
}
