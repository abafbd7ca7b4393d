//! Serialized access to the 2D compositor.
//!
//! The engine runs one operation at a time. A mutex decides which task may
//! issue the next operation; the issuing task then sleeps on a completion
//! semaphore that the driver gives from its interrupt path. The same mutex
//! guards the text scratch image, which the engine reads during blends.

use super::overlay::{DrawOp, PixelRect, MAX_LINE_CHARS};
use crate::error::{PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vision_hal::{
    BlendRequest, BlitCompletion, Blitter, DmaBuffer, FillRequest, FontRasterizer, FontSize,
    Surface, ARGB_BPP,
};
use vision_pool::CountingSemaphore;

/// Completion state shared with the driver.
struct Completion {
    done: CountingSemaphore,
    failed: AtomicBool,
}

impl BlitCompletion for Completion {
    fn complete(&self) {
        self.done.give();
    }

    fn error(&self) {
        self.failed.store(true, Ordering::Release);
        self.done.give();
    }
}

/// Hardware compositor front end.
pub struct Compositor {
    blitter: Arc<dyn Blitter>,
    fonts: Arc<dyn FontRasterizer>,
    scratch: Mutex<DmaBuffer>,
    completion: Arc<Completion>,
}

impl Compositor {
    /// Wraps `blitter`, allocating a scratch image large enough for the
    /// longest line in the largest font.
    pub fn new(blitter: Arc<dyn Blitter>, fonts: Arc<dyn FontRasterizer>) -> PipelineResult<Self> {
        let cell = [FontSize::Small, FontSize::Medium, FontSize::Large]
            .into_iter()
            .map(|f| {
                let (w, h) = fonts.glyph_size(f);
                w as usize * h as usize
            })
            .max()
            .unwrap_or(0);
        let scratch = DmaBuffer::alloc((cell * MAX_LINE_CHARS * ARGB_BPP).max(ARGB_BPP))?;
        Ok(Self {
            blitter,
            fonts,
            scratch: Mutex::new(scratch),
            completion: Arc::new(Completion {
                done: CountingSemaphore::new(0, 1),
                failed: AtomicBool::new(false),
            }),
        })
    }

    /// Blocks until the outstanding operation completes.
    fn wait(&self) -> PipelineResult<()> {
        self.completion.done.take();
        if self.completion.failed.swap(false, Ordering::AcqRel) {
            return Err(PipelineError::Compositor);
        }
        Ok(())
    }

    fn completion(&self) -> Arc<dyn BlitCompletion> {
        Arc::clone(&self.completion) as Arc<dyn BlitCompletion>
    }

    /// Solid fill of a rectangle.
    pub fn fill(&self, req: FillRequest) -> PipelineResult<()> {
        let _hw = self.scratch.lock();
        self.blitter.start_fill(req, self.completion())?;
        self.wait()
    }

    /// One-pixel outline of `rect`.
    pub fn rect(&self, dst: Surface, rect: PixelRect, color: u32) -> PipelineResult<()> {
        let PixelRect {
            x,
            y,
            width,
            height,
        } = rect;
        if width == 0 || height == 0 {
            return Ok(());
        }
        let line = |x, y, width, height| FillRequest {
            dst,
            x,
            y,
            width,
            height,
            color,
        };
        self.fill(line(x, y, width, 1))?;
        self.fill(line(x, y + height - 1, width, 1))?;
        self.fill(line(x, y, 1, height))?;
        self.fill(line(x + width - 1, y, 1, height))
    }

    /// Renders `text` and blends it onto `dst` at `(x, y)`.
    pub fn text(
        &self,
        dst: Surface,
        x: u32,
        y: u32,
        font: FontSize,
        text: &str,
    ) -> PipelineResult<()> {
        let scratch = self.scratch.lock();
        let glyphs = self.fonts.rasterize(text, font, *scratch)?;
        let req = BlendRequest {
            dst,
            src: glyphs,
            x,
            y,
            width: glyphs.width,
            height: glyphs.height,
        };
        self.blitter.start_blend(req, self.completion())?;
        self.wait()
    }

    /// Executes overlay operations in order.
    pub fn draw(&self, dst: Surface, ops: &[DrawOp]) -> PipelineResult<()> {
        for op in ops {
            match op {
                DrawOp::Rect { rect, color } => self.rect(dst, *rect, *color)?,
                DrawOp::Text { x, y, font, text } => self.text(dst, *x, *y, *font, text)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use vision_driver_mock::{MockBlitter, MockRasterizer};

    fn surface(w: u32, h: u32) -> Surface {
        Surface {
            buffer: DmaBuffer::alloc((w * h) as usize * ARGB_BPP).unwrap(),
            width: w,
            height: h,
        }
    }

    fn pixel(s: &Surface, x: u32, y: u32) -> u32 {
        let at = (y * s.width + x) as usize * ARGB_BPP;
        let bytes = unsafe { s.buffer.as_slice() };
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn compositor(latency: Duration) -> (Compositor, Arc<MockBlitter>, Arc<MockRasterizer>) {
        let blitter = Arc::new(MockBlitter::new(latency).unwrap());
        let fonts = Arc::new(MockRasterizer::new());
        let comp = Compositor::new(blitter.clone(), fonts.clone()).unwrap();
        (comp, blitter, fonts)
    }

    #[test]
    fn rect_draws_an_outline() {
        let (comp, blitter, _) = compositor(Duration::ZERO);
        let dst = surface(16, 16);
        let rect = PixelRect {
            x: 2,
            y: 3,
            width: 5,
            height: 4,
        };
        comp.rect(dst, rect, 0xffff_ffff).unwrap();

        assert_eq!(blitter.fills(), 4);
        for (x, y) in [(2, 3), (6, 3), (2, 6), (6, 6), (4, 3), (2, 5)] {
            assert_eq!(pixel(&dst, x, y), 0xffff_ffff, "({x},{y})");
        }
        assert_eq!(pixel(&dst, 4, 4), 0);
    }

    #[test]
    fn text_is_rasterized_then_blended() {
        let (comp, blitter, fonts) = compositor(Duration::ZERO);
        let dst = surface(64, 32);
        comp.text(dst, 0, 0, FontSize::Medium, "ok").unwrap();

        assert_eq!(blitter.blends(), 1);
        assert_eq!(fonts.take_rendered(), vec!["ok".to_string()]);
        // glyph body is opaque white, the cell border only darkens
        assert_eq!(pixel(&dst, 5, 8), 0xffff_ffff);
        assert_eq!(pixel(&dst, 0, 0), 0xff00_0000);
    }

    #[test]
    fn error_completion_is_reported() {
        let (comp, blitter, _) = compositor(Duration::ZERO);
        let dst = surface(8, 8);
        blitter.faults().set(true);
        let req = FillRequest {
            dst,
            x: 0,
            y: 0,
            width: 8,
            height: 8,
            color: 1,
        };
        assert!(matches!(comp.fill(req), Err(PipelineError::Compositor)));

        blitter.faults().set(false);
        comp.fill(req).unwrap();
    }

    #[test]
    fn out_of_bounds_requests_are_refused() {
        let (comp, _, _) = compositor(Duration::ZERO);
        let dst = surface(8, 8);
        let req = FillRequest {
            dst,
            x: 4,
            y: 0,
            width: 8,
            height: 1,
            color: 1,
        };
        assert!(matches!(comp.fill(req), Err(PipelineError::Hal(_))));
    }

    #[test]
    fn concurrent_users_never_overlap() {
        let (comp, blitter, _) = compositor(Duration::from_micros(200));
        let comp = Arc::new(comp);
        let dst = surface(32, 40);

        let workers: Vec<_> = (0..4u32)
            .map(|i| {
                let comp = Arc::clone(&comp);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let rect = PixelRect {
                            x: i * 8,
                            y: i * 8,
                            width: 8,
                            height: 8,
                        };
                        comp.rect(dst, rect, 0xff00_00ff).unwrap();
                        comp.text(dst, 0, i * 8, FontSize::Small, "x").unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(blitter.fills(), 4 * 10 * 4);
        assert_eq!(blitter.blends(), 4 * 10);
        assert_eq!(blitter.max_outstanding(), 1);
    }
}
