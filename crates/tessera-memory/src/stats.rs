//! Allocation statistics.

/// Snapshot of the allocator's bookkeeping.
///
/// `bytes_allocated_by_backend` counts backing pages requested from the
/// system; `bytes_allocated_by_frontend` counts bytes handed out to entries,
/// headers included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub bytes_allocated_by_backend: usize,
    pub bytes_allocated_by_frontend: usize,
    pub pools: usize,
    pub entries: usize,
}

impl Statistics {
    pub(crate) fn on_pool_created(&mut self, backing: usize) {
        self.bytes_allocated_by_backend += backing;
        self.pools += 1;
    }

    pub(crate) fn on_pool_released(&mut self, backing: usize) {
        self.bytes_allocated_by_backend -= backing;
        self.pools -= 1;
    }

    pub(crate) fn on_entry_allocated(&mut self, total: usize) {
        self.bytes_allocated_by_frontend += total;
        self.entries += 1;
    }

    pub(crate) fn on_entry_released(&mut self, total: usize) {
        self.bytes_allocated_by_frontend -= total;
        self.entries -= 1;
    }

    pub(crate) fn on_entry_resized(&mut self, old_total: usize, new_total: usize) {
        self.bytes_allocated_by_frontend -= old_total;
        self.bytes_allocated_by_frontend += new_total;
    }
}
