//! Reflection-driven hashing.

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::block::Block;
use crate::error::{BlockError, BlockResult};

/// Hash a raw byte range.
#[inline]
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

impl Block {
    /// Hash the contents.
    ///
    /// Empty or untyped blocks hash to zero. A single element hashes as the
    /// element itself (resolved through sparsity and dynamic typing), which
    /// removes the asymmetry between a one-element container and its value.
    /// POD data hashes its byte range; anything else hashes each element and
    /// then the concatenation of those hashes.
    pub fn hash(&self) -> BlockResult<u64> {
        let Some(ty) = self.ty() else {
            return Ok(0);
        };
        if self.is_empty() {
            return Ok(0);
        }

        if self.count() == 1 {
            if self.is_sparse() || ty.resolve.is_some() {
                let resolved = self.element_resolved(0);
                if core::ptr::eq(resolved.raw(), self.raw()) && resolved.ty() == self.ty() {
                    return self.hash_element_flat(0);
                }
                return resolved.hash();
            }
            return self.hash_element_flat(0);
        }

        if self.is_sparse() || ty.resolve.is_some() {
            let mut hashes: SmallVec<[u64; 16]> = SmallVec::with_capacity(self.count());
            for i in 0..self.count() {
                hashes.push(self.element_resolved(i).hash()?);
            }
            return Ok(hash_u64s(&hashes));
        }

        if let Some(hasher) = ty.hash {
            let mut hashes: SmallVec<[u64; 16]> = SmallVec::with_capacity(self.count());
            for i in 0..self.count() {
                // SAFETY: elements [0, count) are initialized instances.
                hashes.push(unsafe { hasher(self.at(i).cast_const()) });
            }
            return Ok(hash_u64s(&hashes));
        }

        if ty.is_pod {
            // SAFETY: POD contents are plain initialized bytes.
            let bytes = unsafe { core::slice::from_raw_parts(self.raw(), self.byte_size()) };
            return Ok(hash_bytes(bytes));
        }

        Err(BlockError::NoHash { ty: ty.token })
    }

    /// Hash one dense element without resolution.
    fn hash_element_flat(&self, index: usize) -> BlockResult<u64> {
        let ty = self.ty().ok_or(BlockError::Untyped)?;
        if ty.is_deep {
            // SAFETY: deep dense elements are Block values.
            return unsafe { &*self.at(index).cast::<Block>() }.hash();
        }
        if let Some(hasher) = ty.hash {
            // SAFETY: the element is initialized.
            return Ok(unsafe { hasher(self.at(index).cast_const()) });
        }
        if ty.is_pod {
            // SAFETY: POD contents are plain initialized bytes.
            let bytes = unsafe { core::slice::from_raw_parts(self.at(index).cast_const(), ty.size) };
            return Ok(hash_bytes(bytes));
        }
        Err(BlockError::NoHash { ty: ty.token })
    }
}

fn hash_u64s(hashes: &[u64]) -> u64 {
    // SAFETY: u64 slices reinterpret as plain bytes.
    let bytes = unsafe {
        core::slice::from_raw_parts(hashes.as_ptr().cast::<u8>(), hashes.len() * size_of::<u64>())
    };
    hash_bytes(bytes)
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
    fn empty_and_untyped_hash_to_zero() {
        assert_eq!(Block::new().hash().unwrap(), 0);
        let typed = Block::from_type(i32::descriptor());
        assert_eq!(typed.hash().unwrap(), 0);
    }

    #[test]
    fn a_singleton_hashes_like_its_element() {
        let mut ctx = Allocator::new();
        let mut block = block_of(&mut ctx, &[555]);

        let value = 555i32;
        let hasher = i32::descriptor().hash.unwrap();
        // SAFETY: valid i32 address.
        let element_hash = unsafe { hasher(core::ptr::from_ref(&value).cast()) };
        assert_eq!(block.hash().unwrap(), element_hash);

        block.reset(&mut ctx).unwrap();
    }

    #[test]
    fn equal_content_hashes_equal() {
        let mut ctx = Allocator::new();
        let mut a = block_of(&mut ctx, &[1, 2, 3, 4, 5]);
        let mut b = block_of(&mut ctx, &[1, 2, 3, 4, 5]);
        let mut c = block_of(&mut ctx, &[1, 2, 3, 4, 6]);

        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        assert_ne!(a.hash().unwrap(), c.hash().unwrap());

        a.reset(&mut ctx).unwrap();
        b.reset(&mut ctx).unwrap();
        c.reset(&mut ctx).unwrap();
    }
}
