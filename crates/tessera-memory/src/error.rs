//! Standalone error types for tessera-memory.
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.

use thiserror::Error;

/// Result alias for allocator operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory substrate errors.
///
/// `PoolCorrupt` is fatal: the pool paths never return it, they abort the
/// process instead. The variant exists so higher layers can name it in
/// diagnostics.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("out of memory: backing allocator refused {size} bytes")]
    OutOfMemory { size: usize },

    #[error("zero-sized allocation is not allowed")]
    ZeroSize,

    #[error("refcount underflow: freed {count} references, only {uses} held")]
    RefcountUnderflow { uses: usize, count: usize },

    #[error("pool corruption detected: {details}")]
    PoolCorrupt { details: &'static str },
}

impl MemoryError {
    /// Error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "MEM:ALLOC:OOM",
            Self::ZeroSize => "MEM:ALLOC:ZERO",
            Self::RefcountUnderflow { .. } => "MEM:REF:UNDERFLOW",
            Self::PoolCorrupt { .. } => "MEM:POOL:CORRUPT",
        }
    }

    /// Whether retrying the operation can ever succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(MemoryError::ZeroSize.code(), "MEM:ALLOC:ZERO");
        assert_eq!(
            MemoryError::OutOfMemory { size: 16 }.code(),
            "MEM:ALLOC:OOM"
        );
        assert!(MemoryError::OutOfMemory { size: 16 }.is_retryable());
        assert!(!MemoryError::ZeroSize.is_retryable());
    }
}
