//! Pipeline tasks.
//!
//! | task | priority | loop |
//! |------|----------|------|
//! | `isp` | +2 | wait for vsync, refresh ISP statistics |
//! | `nn` | +1 | input ready → output free → bind → infer → hand over |
//! | `dp` | -2 | output ready → decode → render/encode/stream → recycle |
//!
//! Priorities are relative to the middle priority. Host threads are not
//! scheduled by them; they are kept to document the intended preemption
//! order and are logged when each task starts.
//!
//! A task that hits an error passes it to the fatal handler and returns.

use super::PipelineContext;
use crate::display::DisplayService;
use crate::error::{PipelineError, PipelineResult};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};
use vision_hal::{CacheMaintenance, CaptureMode, DmaBuffer, Pipe, Postprocessor};
use vision_nn::ModelRegistry;
use vision_pool::{Consumer, Producer};
use vision_stats::Metric;

/// Static description of one pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Thread name.
    pub name: &'static str,
    /// Priority relative to the middle priority.
    pub priority: i8,
}

/// ISP statistics refresh.
pub const ISP_TASK: TaskSpec = TaskSpec {
    name: "isp",
    priority: 2,
};

/// Inference.
pub const NN_TASK: TaskSpec = TaskSpec {
    name: "nn",
    priority: 1,
};

/// Postprocess, display, encode and stream.
pub const DISPLAY_TASK: TaskSpec = TaskSpec {
    name: "dp",
    priority: -2,
};

pub(crate) fn spawn<F>(spec: TaskSpec, stack_size: usize, body: F) -> PipelineResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(spec.name.to_string())
        .stack_size(stack_size)
        .spawn(move || {
            info!(task = spec.name, priority = spec.priority, "task started");
            body();
        })
        .map_err(|source| PipelineError::Spawn {
            name: spec.name,
            source,
        })
}

fn run_loop(ctx: &PipelineContext, task: &'static str, mut step: impl FnMut() -> PipelineResult<()>) {
    loop {
        if let Err(e) = step() {
            debug!(task, "task stopping on error");
            ctx.fatal(e);
            return;
        }
    }
}

// =============================================================================
// ISP task
// =============================================================================

pub(crate) fn isp_task(ctx: Arc<PipelineContext>) {
    run_loop(&ctx, ISP_TASK.name, || {
        ctx.isp_wake.take();
        ctx.camera.isp_update()?;
        Ok(())
    });
}

// =============================================================================
// NN task
// =============================================================================

pub(crate) struct NnTask {
    pub(crate) ctx: Arc<PipelineContext>,
    pub(crate) input: Consumer<DmaBuffer>,
    pub(crate) output: Producer<DmaBuffer>,
    pub(crate) registry: ModelRegistry<'static>,
    pub(crate) cache: CacheMaintenance,
}

impl NnTask {
    pub(crate) fn run(mut self) {
        if let Err(e) = self.setup() {
            self.ctx.fatal(e);
            return;
        }
        let ctx = Arc::clone(&self.ctx);
        run_loop(&ctx, NN_TASK.name, || self.step());
    }

    /// Binds the active model and starts the ancillary pipe into the first
    /// free input buffer.
    fn setup(&mut self) -> PipelineResult<()> {
        let handle = self
            .registry
            .active()
            .map(|m| m.handle())
            .ok_or_else(|| PipelineError::Invalid("no active model".into()))?;
        self.registry.select(handle)?;

        let first = self.ctx.nn_input.lock().acquire_free();
        self.ctx
            .camera
            .start(Pipe::Ancillary, first, CaptureMode::Continuous)?;
        info!(model = %handle, "ancillary pipe streaming");
        Ok(())
    }

    fn step(&mut self) -> PipelineResult<()> {
        let stats = &self.ctx.stats;
        let input = self.input.acquire_ready();
        let output = self.output.acquire_free();

        let start = stats.now_ms();
        let (in_len, out_len) = self
            .registry
            .active()
            .map(|m| (m.input_size(), m.output_size()))
            .ok_or_else(|| PipelineError::Invalid("no active model".into()))?;
        self.cache.invalidate(output.addr(), out_len);
        self.registry.prepare_io(input, in_len, output, out_len)?;
        let registry = &self.registry;
        stats.time(Metric::NnInference, || registry.run_active())?;

        self.input.release_free()?;
        self.output.publish_ready()?;
        stats.update(Metric::NnTotal, stats.now_ms().wrapping_sub(start));
        Ok(())
    }
}

// =============================================================================
// Display task
// =============================================================================

pub(crate) struct DisplayTask {
    pub(crate) ctx: Arc<PipelineContext>,
    pub(crate) output: Consumer<DmaBuffer>,
    pub(crate) output_len: usize,
    pub(crate) postprocessor: Box<dyn Postprocessor>,
    pub(crate) display: DisplayService,
}

impl DisplayTask {
    pub(crate) fn run(mut self) {
        let ctx = Arc::clone(&self.ctx);
        run_loop(&ctx, DISPLAY_TASK.name, || self.step());
    }

    fn step(&mut self) -> PipelineResult<()> {
        let stats = Arc::clone(&self.ctx.stats);
        let output = self.output.acquire_ready();
        let start = stats.now_ms();

        // SAFETY: the buffer is held by this consumer until release_free
        // below; the accelerator finished writing it before it was
        // published.
        let tensor = unsafe { &output.as_slice()[..self.output_len] };
        let postprocessor = &mut self.postprocessor;
        let detections = stats.time(Metric::NnPostprocess, || postprocessor.run(tensor))?;
        stats.cpu_load_sample();

        let frame = self.ctx.capture.display_buffer();
        if self.display.render(frame, &detections)? {
            stats.update(Metric::DisplayTotal, stats.now_ms().wrapping_sub(start));
        }

        self.output.release_free()?;
        Ok(())
    }
}
