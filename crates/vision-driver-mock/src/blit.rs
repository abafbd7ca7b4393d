//! Software compositor and font rasterizer.
//!
//! [`MockBlitter`] performs fills and blends on a dedicated "IRQ" thread and
//! reports completion from there, like the hardware engine would. It also
//! tracks how many operations were in flight at once so tests can check that
//! callers serialize access.

use crate::fault::FaultInjector;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;
use vision_hal::{
    BlendRequest, BlitCompletion, Blitter, DmaBuffer, FillRequest, FontRasterizer, FontSize,
    HalError, HalErrorKind, Surface, ARGB_BPP,
};

enum Job {
    Fill(FillRequest),
    Blend(BlendRequest),
}

#[derive(Default)]
struct BlitStats {
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    fills: AtomicUsize,
    blends: AtomicUsize,
}

fn check_rect(dst: &Surface, x: u32, y: u32, w: u32, h: u32) -> Result<(), HalError> {
    let fits = u64::from(x) + u64::from(w) <= u64::from(dst.width)
        && u64::from(y) + u64::from(h) <= u64::from(dst.height)
        && dst.byte_len() <= dst.buffer.len();
    if fits {
        Ok(())
    } else {
        Err(HalError::new(
            "blitter",
            HalErrorKind::InvalidParameter,
            format!(
                "{w}x{h} at ({x},{y}) outside {}x{} surface",
                dst.width, dst.height
            ),
        ))
    }
}

fn pixel_offset(surface: &Surface, x: u32, y: u32) -> usize {
    (y as usize * surface.width as usize + x as usize) * ARGB_BPP
}

fn fill(req: &FillRequest) {
    // SAFETY: the compositor holds the destination exclusively until the
    // completion callback fires.
    let dst = unsafe { req.dst.buffer.as_mut_slice() };
    let color = req.color.to_le_bytes();
    for row in req.y..req.y + req.height {
        let start = pixel_offset(&req.dst, req.x, row);
        for px in dst[start..start + req.width as usize * ARGB_BPP].chunks_exact_mut(ARGB_BPP) {
            px.copy_from_slice(&color);
        }
    }
}

fn blend_channel(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(fg) * a + u32::from(bg) * (255 - a)) / 255) as u8
}

fn blend(req: &BlendRequest) {
    // SAFETY: as for fill; the source scratch image is also held by the
    // compositor for the duration of the operation.
    let dst = unsafe { req.dst.buffer.as_mut_slice() };
    let src = unsafe { req.src.buffer.as_slice() };
    for row in 0..req.height {
        for col in 0..req.width {
            let s = pixel_offset(&req.src, col, row);
            let d = pixel_offset(&req.dst, req.x + col, req.y + row);
            // little-endian ARGB8888: [B, G, R, A]
            let alpha = src[s + 3];
            for c in 0..3 {
                dst[d + c] = blend_channel(src[s + c], dst[d + c], alpha);
            }
            dst[d + 3] = 0xff;
        }
    }
}

/// Software 2D engine with interrupt-style completion.
pub struct MockBlitter {
    jobs: Mutex<Sender<(Job, Arc<dyn BlitCompletion>)>>,
    stats: Arc<BlitStats>,
    faults: FaultInjector,
}

impl MockBlitter {
    /// Engine whose operations take `latency` each.
    pub fn new(latency: Duration) -> Result<Self, HalError> {
        let (tx, rx) = mpsc::channel::<(Job, Arc<dyn BlitCompletion>)>();
        let stats = Arc::new(BlitStats::default());
        let irq_stats = Arc::clone(&stats);
        thread::Builder::new()
            .name("mock-blit-irq".into())
            .spawn(move || {
                for (job, done) in rx {
                    if !latency.is_zero() {
                        thread::sleep(latency);
                    }
                    match job {
                        Job::Fill(req) => fill(&req),
                        Job::Blend(req) => blend(&req),
                    }
                    irq_stats.outstanding.fetch_sub(1, Ordering::SeqCst);
                    done.complete();
                }
            })
            .map_err(|e| HalError::new("blitter", HalErrorKind::Initialization, e.to_string()))?;

        Ok(Self {
            jobs: Mutex::new(tx),
            stats,
            faults: FaultInjector::new("blitter", "transfer"),
        })
    }

    /// Completed and pending fills.
    pub fn fills(&self) -> usize {
        self.stats.fills.load(Ordering::SeqCst)
    }

    /// Completed and pending blends.
    pub fn blends(&self) -> usize {
        self.stats.blends.load(Ordering::SeqCst)
    }

    /// Highest number of operations ever outstanding at once.
    pub fn max_outstanding(&self) -> usize {
        self.stats.max_outstanding.load(Ordering::SeqCst)
    }

    /// Failure injection; a failing operation reports `error()` instead of
    /// `complete()`.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    fn submit(&self, job: Job, done: Arc<dyn BlitCompletion>) -> Result<(), HalError> {
        if self.faults.check().is_err() {
            warn!("injected blit transfer error");
            done.error();
            return Ok(());
        }
        let now = self.stats.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_outstanding.fetch_max(now, Ordering::SeqCst);
        self.jobs.lock().send((job, done)).map_err(|_| {
            self.stats.outstanding.fetch_sub(1, Ordering::SeqCst);
            HalError::new("blitter", HalErrorKind::NotReady, "irq thread gone")
        })
    }
}

impl Blitter for MockBlitter {
    fn start_fill(&self, req: FillRequest, done: Arc<dyn BlitCompletion>) -> Result<(), HalError> {
        check_rect(&req.dst, req.x, req.y, req.width, req.height)?;
        self.stats.fills.fetch_add(1, Ordering::SeqCst);
        self.submit(Job::Fill(req), done)
    }

    fn start_blend(
        &self,
        req: BlendRequest,
        done: Arc<dyn BlitCompletion>,
    ) -> Result<(), HalError> {
        check_rect(&req.dst, req.x, req.y, req.width, req.height)?;
        if req.width > req.src.width
            || req.height > req.src.height
            || req.src.byte_len() > req.src.buffer.len()
        {
            return Err(HalError::new(
                "blitter",
                HalErrorKind::InvalidParameter,
                "blend region larger than source image",
            ));
        }
        self.stats.blends.fetch_add(1, Ordering::SeqCst);
        self.submit(Job::Blend(req), done)
    }
}

// =============================================================================
// Rasterizer
// =============================================================================

/// Block-glyph rasterizer that remembers every string it rendered.
#[derive(Debug, Default)]
pub struct MockRasterizer {
    rendered: Mutex<Vec<String>>,
}

impl MockRasterizer {
    /// Rasterizer with an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the strings rendered since the last call.
    pub fn take_rendered(&self) -> Vec<String> {
        std::mem::take(&mut *self.rendered.lock())
    }
}

impl FontRasterizer for MockRasterizer {
    fn glyph_size(&self, font: FontSize) -> (u32, u32) {
        match font {
            FontSize::Small => (7, 12),
            FontSize::Medium => (11, 16),
            FontSize::Large => (24, 32),
        }
    }

    fn rasterize(
        &self,
        text: &str,
        font: FontSize,
        scratch: DmaBuffer,
    ) -> Result<Surface, HalError> {
        let (gw, gh) = self.glyph_size(font);
        let chars = text.chars().count() as u32;
        let surface = Surface {
            buffer: scratch,
            width: (chars * gw).max(1),
            height: gh,
        };
        if surface.byte_len() > scratch.len() {
            return Err(HalError::new(
                "font",
                HalErrorKind::InvalidParameter,
                format!("text of {chars} glyphs does not fit the scratch buffer"),
            ));
        }

        // SAFETY: the scratch buffer belongs to the compositor lock holder.
        let px = unsafe { scratch.as_mut_slice() };
        for (i, ch) in text.chars().enumerate() {
            for row in 0..gh {
                for col in 0..gw {
                    let inked = !ch.is_whitespace()
                        && row > 1
                        && row + 2 < gh
                        && col > 0
                        && col + 1 < gw;
                    // translucent black cell with opaque white glyph body
                    let argb: u32 = if inked { 0xffff_ffff } else { 0x8000_0000 };
                    let at = pixel_offset(&surface, i as u32 * gw + col, row);
                    px[at..at + ARGB_BPP].copy_from_slice(&argb.to_le_bytes());
                }
            }
        }
        self.rendered.lock().push(text.to_string());
        Ok(surface)
    }
}
