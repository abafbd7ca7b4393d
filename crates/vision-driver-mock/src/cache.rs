//! Data cache stand-in that records maintenance requests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use vision_hal::CacheController;

const LOG_DEPTH: usize = 256;

/// Kind of maintenance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOpKind {
    /// `invalidate_range`
    Invalidate,
    /// `clean_range`
    Clean,
    /// `clean_invalidate_range`
    CleanInvalidate,
}

/// One recorded maintenance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOp {
    /// Operation.
    pub kind: CacheOpKind,
    /// Line-aligned start address.
    pub addr: usize,
    /// Line-aligned length.
    pub len: usize,
}

/// Cache controller keeping the most recent requests.
#[derive(Debug)]
pub struct MockCache {
    enabled: AtomicBool,
    ops: Mutex<VecDeque<CacheOp>>,
}

impl MockCache {
    /// Enabled cache with an empty log.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ops: Mutex::new(VecDeque::with_capacity(LOG_DEPTH)),
        }
    }

    /// Enables or disables the cache.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Recorded requests, oldest first.
    pub fn ops(&self) -> Vec<CacheOp> {
        self.ops.lock().iter().copied().collect()
    }

    fn record(&self, kind: CacheOpKind, addr: usize, len: usize) {
        let mut ops = self.ops.lock();
        if ops.len() == LOG_DEPTH {
            ops.pop_front();
        }
        ops.push_back(CacheOp { kind, addr, len });
    }
}

impl Default for MockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheController for MockCache {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn invalidate_range(&self, addr: usize, len: usize) {
        self.record(CacheOpKind::Invalidate, addr, len);
    }

    fn clean_range(&self, addr: usize, len: usize) {
        self.record(CacheOpKind::Clean, addr, len);
    }

    fn clean_invalidate_range(&self, addr: usize, len: usize) {
        self.record(CacheOpKind::CleanInvalidate, addr, len);
    }
}
