//! Display-pipe capture ring.
//!
//! The main pipe writes into slot `capture` while the display task draws
//! into slot `display`. The display cursor always sits one slot ahead of
//! the capture cursor, which makes it the oldest completed frame: with
//! `delay + 2` slots the displayed image is `delay` frames behind the most
//! recent capture, and the camera never writes the slot being drawn.
//!
//! Cursors are written only by the main-pipe frame interrupt and read by the
//! display task, so plain atomics with release/acquire ordering suffice.

use crate::error::{PipelineError, PipelineResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use vision_hal::DmaBuffer;

/// Fixed ring of display-pipe buffers with capture and display cursors.
#[derive(Debug)]
pub struct CaptureRing {
    buffers: Box<[DmaBuffer]>,
    capture: AtomicUsize,
    display: AtomicUsize,
}

impl CaptureRing {
    /// Ring over `buffers`; needs at least two slots.
    pub fn new(buffers: Vec<DmaBuffer>) -> PipelineResult<Self> {
        if buffers.len() < 2 {
            return Err(PipelineError::Invalid(format!(
                "capture ring needs at least 2 buffers, got {}",
                buffers.len()
            )));
        }
        Ok(Self {
            buffers: buffers.into_boxed_slice(),
            capture: AtomicUsize::new(0),
            display: AtomicUsize::new(1),
        })
    }

    /// Allocates `delay + 2` frames of `frame_len` bytes.
    pub fn allocate(delay: usize, frame_len: usize) -> PipelineResult<Self> {
        Self::new(DmaBuffer::alloc_set(delay + 2, frame_len)?)
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Always false; a ring has at least two slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Slot the camera is writing.
    #[must_use]
    pub fn capture_index(&self) -> usize {
        self.capture.load(Ordering::Acquire)
    }

    /// Slot the display task draws into.
    #[must_use]
    pub fn display_index(&self) -> usize {
        self.display.load(Ordering::Acquire)
    }

    /// Buffer the camera is writing.
    #[must_use]
    pub fn capture_buffer(&self) -> DmaBuffer {
        self.buffers[self.capture_index()]
    }

    /// Buffer the display task draws into.
    #[must_use]
    pub fn display_buffer(&self) -> DmaBuffer {
        self.buffers[self.display_index()]
    }

    /// Moves both cursors one slot forward and returns the new capture
    /// destination. Called from the main-pipe frame interrupt only.
    pub fn advance(&self) -> DmaBuffer {
        let n = self.buffers.len();
        let next_display = (self.display.load(Ordering::Relaxed) + 1) % n;
        let next_capture = (self.capture.load(Ordering::Relaxed) + 1) % n;
        self.display.store(next_display, Ordering::Release);
        self.capture.store(next_capture, Ordering::Release);
        self.buffers[next_capture]
    }
}
