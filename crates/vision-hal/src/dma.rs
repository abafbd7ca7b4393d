//! DMA-visible memory regions.
//!
//! A [`DmaBuffer`] is a `Copy` handle to a 32-byte aligned region that is
//! allocated once and never released, the host stand-in for a buffer placed
//! by the firmware linker script. Handles are passed around freely (into
//! queues, into camera destination registers, into the accelerator); who may
//! touch the bytes at any moment is decided by the queue or ring that handed
//! the handle out, which is why software access is `unsafe`.

use crate::error::{HalError, HalErrorKind};
use std::alloc::{alloc_zeroed, Layout};
use std::fmt;
use std::ptr::NonNull;

/// Alignment of every DMA region; matches the data cache line size.
pub const DMA_ALIGN: usize = 32;

/// Handle to a fixed DMA-capable memory region.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: DmaBuffer is a plain address/length pair. The region it names is
// never freed, and every byte access goes through the unsafe slice views below
// whose callers uphold exclusivity through the owning queue or ring protocol.
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// Allocates a zeroed region of `len` bytes that lives for the rest of the
    /// process.
    pub fn alloc(len: usize) -> Result<Self, HalError> {
        if len == 0 {
            return Err(HalError::new(
                "dma",
                HalErrorKind::InvalidParameter,
                "zero-length region",
            ));
        }
        let layout = Layout::from_size_align(len, DMA_ALIGN)
            .map_err(|e| HalError::new("dma", HalErrorKind::InvalidParameter, e.to_string()))?;
        // SAFETY: layout has a non-zero size, checked above.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            HalError::new(
                "dma",
                HalErrorKind::Allocation,
                format!("out of memory allocating {len} bytes"),
            )
        })?;
        Ok(Self { ptr, len })
    }

    /// Allocates `count` regions of `len` bytes each.
    pub fn alloc_set(count: usize, len: usize) -> Result<Vec<Self>, HalError> {
        (0..count).map(|_| Self::alloc(len)).collect()
    }

    /// Bus address of the first byte.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Region length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for an allocated region; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shared view of the region.
    ///
    /// # Safety
    ///
    /// No other party (software or a simulated DMA master) may write the
    /// region while the returned slice is alive.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        // SAFETY: the region is live for the whole process and `len` bytes
        // long; the caller guarantees there is no concurrent writer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Exclusive view of the region.
    ///
    /// # Safety
    ///
    /// The caller must own the buffer under the protocol that handed it out,
    /// and no other view of the region may be alive for the returned lifetime.
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        // SAFETY: as above, plus the caller guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_aligned_and_zeroed() {
        let buf = DmaBuffer::alloc(100).unwrap();
        assert_eq!(buf.addr() % DMA_ALIGN, 0);
        assert_eq!(buf.len(), 100);
        let bytes = unsafe { buf.as_slice() };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = DmaBuffer::alloc(0).unwrap_err();
        assert_eq!(err.kind, HalErrorKind::InvalidParameter);
    }

    #[test]
    fn copies_name_the_same_region() {
        let a = DmaBuffer::alloc(64).unwrap();
        let b = a;
        unsafe { a.as_mut_slice()[3] = 7 };
        assert_eq!(unsafe { b.as_slice()[3] }, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn alloc_set_returns_distinct_regions() {
        let set = DmaBuffer::alloc_set(3, 32).unwrap();
        assert_eq!(set.len(), 3);
        assert_ne!(set[0], set[1]);
        assert_ne!(set[1], set[2]);
    }
}
