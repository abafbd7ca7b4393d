//! Data-cache maintenance around DMA transfers.

use std::sync::Arc;

/// Data cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 32;

/// Low-level cache operations on line-aligned ranges.
pub trait CacheController: Send + Sync {
    /// Whether the data cache is currently enabled.
    fn is_enabled(&self) -> bool;

    /// Discards cached lines so the next reads observe DMA writes.
    fn invalidate_range(&self, addr: usize, len: usize);

    /// Writes dirty lines back so a DMA master observes CPU writes.
    fn clean_range(&self, addr: usize, len: usize);

    /// Writes dirty lines back, then discards them.
    fn clean_invalidate_range(&self, addr: usize, len: usize);
}

/// Expands `[addr, addr + len)` outward to whole cache lines.
#[must_use]
pub fn align_to_lines(addr: usize, len: usize) -> (usize, usize) {
    let start = addr & !(CACHE_LINE_SIZE - 1);
    let end = (addr + len + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1);
    (start, end - start)
}

/// Convenience wrapper that aligns ranges and skips no-op requests.
#[derive(Clone)]
pub struct CacheMaintenance {
    controller: Arc<dyn CacheController>,
}

impl CacheMaintenance {
    /// Wraps a controller.
    pub fn new(controller: Arc<dyn CacheController>) -> Self {
        Self { controller }
    }

    fn apply(&self, addr: usize, len: usize, op: impl FnOnce(&dyn CacheController, usize, usize)) {
        if len == 0 || !self.controller.is_enabled() {
            return;
        }
        let (start, aligned) = align_to_lines(addr, len);
        op(self.controller.as_ref(), start, aligned);
    }

    /// Invalidates every line overlapping the range.
    pub fn invalidate(&self, addr: usize, len: usize) {
        self.apply(addr, len, |c, a, l| c.invalidate_range(a, l));
    }

    /// Cleans every line overlapping the range.
    pub fn clean(&self, addr: usize, len: usize) {
        self.apply(addr, len, |c, a, l| c.clean_range(a, l));
    }

    /// Cleans and invalidates every line overlapping the range.
    pub fn clean_invalidate(&self, addr: usize, len: usize) {
        self.apply(addr, len, |c, a, l| c.clean_invalidate_range(a, l));
    }
}
