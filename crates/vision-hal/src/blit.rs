//! 2D compositor (fill and alpha-blend engine) and font rendering.
//!
//! Operations are started from task context and finish asynchronously; the
//! driver reports completion through a [`BlitCompletion`] from its interrupt
//! path. Only one operation may be outstanding at a time, the caller is
//! responsible for serializing access.

use crate::dma::DmaBuffer;
use crate::error::HalError;
use std::sync::Arc;

/// Bytes per ARGB8888 pixel.
pub const ARGB_BPP: usize = 4;

/// ARGB8888 image laid out contiguously with a stride of `width` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    /// Backing memory.
    pub buffer: DmaBuffer,
    /// Width in pixels (also the stride).
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Surface {
    /// Byte length covered by the image.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * ARGB_BPP
    }
}

/// Solid fill of a rectangle inside `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillRequest {
    /// Destination image.
    pub dst: Surface,
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Rectangle width.
    pub width: u32,
    /// Rectangle height.
    pub height: u32,
    /// ARGB8888 color.
    pub color: u32,
}

/// Alpha blend of the top-left `width`×`height` region of `src` onto `dst`
/// at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendRequest {
    /// Destination image.
    pub dst: Surface,
    /// Foreground image.
    pub src: Surface,
    /// Destination left edge.
    pub x: u32,
    /// Destination top edge.
    pub y: u32,
    /// Blended region width.
    pub width: u32,
    /// Blended region height.
    pub height: u32,
}

/// Interrupt-context completion callback.
pub trait BlitCompletion: Send + Sync {
    /// The outstanding operation finished.
    fn complete(&self);

    /// The outstanding operation failed (transfer or configuration error).
    fn error(&self);
}

/// Hardware compositor driver.
pub trait Blitter: Send + Sync {
    /// Starts a fill; `done` is signalled exactly once.
    fn start_fill(&self, req: FillRequest, done: Arc<dyn BlitCompletion>) -> Result<(), HalError>;

    /// Starts a blend; `done` is signalled exactly once.
    fn start_blend(&self, req: BlendRequest, done: Arc<dyn BlitCompletion>)
        -> Result<(), HalError>;
}

/// Font sizes available for overlay text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontSize {
    /// Debug overlay text.
    Small,
    /// Status lines and confidence labels.
    Medium,
    /// Large figures (detection count badge).
    Large,
}

/// Renders text into an ARGB scratch image.
pub trait FontRasterizer: Send + Sync {
    /// Glyph cell size `(width, height)` in pixels for `font`.
    fn glyph_size(&self, font: FontSize) -> (u32, u32);

    /// Renders `text` tightly packed into `scratch` and returns the image it
    /// produced. Fails when the text does not fit.
    fn rasterize(&self, text: &str, font: FontSize, scratch: DmaBuffer)
        -> Result<Surface, HalError>;
}
