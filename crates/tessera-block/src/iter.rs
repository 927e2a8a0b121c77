//! Element iteration.
//!
//! Iteration yields borrowed single-element views, so callers dispatch on
//! the descriptor themselves. Structure mutation while iterating is
//! undefined; mutating elements in place through a view is fine.

use core::marker::PhantomData;

use crate::block::Block;

/// Cursor over a block's elements, yielding borrowed single-element views.
pub struct Elements<'a> {
    block: *const Block,
    index: usize,
    count: usize,
    _marker: PhantomData<&'a Block>,
}

impl Iterator for Elements<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.index >= self.count {
            return None;
        }
        // SAFETY: the cursor borrows the block for 'a.
        let element = unsafe { &*self.block }.element(self.index);
        self.index += 1;
        Some(element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Elements<'_> {}

impl Block {
    /// Cursor over borrowed single-element views.
    #[must_use]
    pub fn elements(&self) -> Elements<'_> {
        Elements {
            block: core::ptr::from_ref(self),
            index: 0,
            count: self.count(),
            _marker: PhantomData,
        }
    }

    /// Visit each element as a borrowed view; the closure returns `false`
    /// to stop. Returns the number of elements visited.
    pub fn for_each_element<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Block) -> bool,
    {
        let mut visited = 0;
        for i in 0..self.count() {
            visited += 1;
            if !f(&self.element(i)) {
                break;
            }
        }
        visited
    }

    /// Visit every nested group, recursing into deep elements.
    ///
    /// With `skip_empty_or_deep` only flat, non-empty groups reach the
    /// closure (the hierarchy is still traversed). `reverse` walks children
    /// back to front. The closure returns `false` to stop; the return value
    /// counts the groups visited.
    pub fn for_each_deep<F>(&self, reverse: bool, skip_empty_or_deep: bool, f: &mut F) -> usize
    where
        F: FnMut(&Block) -> bool,
    {
        let mut visited = 0;
        self.for_each_deep_inner(reverse, skip_empty_or_deep, f, &mut visited);
        visited
    }

    fn for_each_deep_inner<F>(
        &self,
        reverse: bool,
        skip: bool,
        f: &mut F,
        visited: &mut usize,
    ) -> bool
    where
        F: FnMut(&Block) -> bool,
    {
        if !skip || (!self.is_deep() && !self.is_empty()) {
            *visited += 1;
            if !f(self) {
                return false;
            }
        }
        if self.is_deep() {
            let indices: Box<dyn Iterator<Item = usize>> = if reverse {
                Box::new((0..self.count()).rev())
            } else {
                Box::new(0..self.count())
            };
            for i in indices {
                if let Some(child) = self.deep_child(i) {
                    if !child.for_each_deep_inner(reverse, skip, f, visited) {
                        return false;
                    }
                }
            }
        }
        true
    }
}
