//! # tessera-block
//!
//! Type-erased memory blocks and the containers built on them.
//!
//! The centerpiece is [`Block`]: a view over `(type, state, count,
//! reserved, pointer, entry)` that knows at runtime how to construct, copy,
//! move, destroy, compare, hash and clone its elements, driven by the
//! frozen descriptors from `tessera-reflect` and allocating through the
//! pooled substrate in `tessera-memory`.
//!
//! On top of the block sit the statically-typed facades, each binary-layout
//! compatible with the type-erased form it wraps:
//! - [`TypedVector`]: a contiguous typed array
//! - [`UnorderedSet`] / [`OrderedSet`]: Robin-Hood hash sets
//! - [`UnorderedMap`] / [`OrderedMap`]: Robin-Hood hash maps
//!
//! Every allocating or refcount-touching operation takes an explicit
//! `&mut Allocator` context; owned containers are released with their
//! `reset` method rather than on drop.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]

pub mod error;

mod block;
mod clone;
mod compare;
mod hash;
mod iter;
mod sparse;
mod state;
mod table;
mod vector;

pub use block::Block;
pub use error::{BlockError, BlockResult};
pub use hash::hash_bytes;
pub use iter::Elements;
pub use sparse::SparseCell;
pub use state::{DataState, Direction, Phase};
pub use table::{
    EraseOutcome, InsertOutcome, OccupiedSlots, OrderedMap, OrderedSet, TableCore, UnorderedMap,
    UnorderedSet,
};
pub use vector::TypedVector;

// The substrate types travel with the containers.
pub use tessera_memory::{Allocator, AllocatorConfig, Entry, MemoryError};
pub use tessera_reflect::{Reflected, TypeDescriptor};
