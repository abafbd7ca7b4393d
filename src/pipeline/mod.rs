//! Pipeline orchestration: interrupt routing, buffer handoff and tasks.
//!
//! ```text
//!  camera main pipe ──frame irq──▶ CaptureRing ─────────────┐
//!         │ vsync irq                                        │ display slot
//!         ▼                                                  ▼
//!    isp task (+2)          nn input queue          dp task (-2) ──▶ encoder ──▶ USB
//!                               │  ▲                     ▲
//!  camera ancillary pipe ─frame irq┘  │                     │
//!                               ▼  │ release              │ nn output queue
//!                           nn task (+1) ───publish──────────┘
//! ```
//!
//! [`Pipeline::start`] performs all setup on the calling thread and returns
//! once the tasks are running. Setup failures come back as
//! [`PipelineError`]; failures after that go to the [`FatalHandler`].
//! There is no shutdown: the topology lives as long as the process.

mod capture;
mod isr;
mod tasks;

pub use capture::CaptureRing;
pub use isr::CameraIsr;
pub use tasks::{TaskSpec, DISPLAY_TASK, ISP_TASK, NN_TASK};

use crate::config::VisionConfig;
use crate::display::DisplayService;
use crate::error::{FatalHandler, PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tasks::{DisplayTask, NnTask};
use tracing::{error, info};
use vision_hal::{
    Blitter, Button, CacheController, CacheMaintenance, Camera, CaptureMode, Clock, DmaBuffer,
    FontRasterizer, FrameEncoder, Led, LedColor, NpuRuntime, Pipe, Postprocessor,
    RunTimeCounters, StreamSink,
};
use vision_nn::{ModelConfig, ModelRegistry};
use vision_pool::{BufferQueue, CountingSemaphore, Producer, MAX_BUFFERS};
use vision_stats::StatsAggregator;

/// Every peripheral the pipeline drives.
#[derive(Clone)]
pub struct PipelineHardware {
    /// Dual-pipe camera.
    pub camera: Arc<dyn Camera>,
    /// Neural-network accelerator runtime.
    pub npu: Arc<dyn NpuRuntime>,
    /// Data cache.
    pub cache: Arc<dyn CacheController>,
    /// 2D compositor.
    pub blitter: Arc<dyn Blitter>,
    /// Text rendering.
    pub fonts: Arc<dyn FontRasterizer>,
    /// Video encoder.
    pub encoder: Arc<dyn FrameEncoder>,
    /// USB video sink.
    pub sink: Arc<dyn StreamSink>,
    /// User button toggling the debug overlay.
    pub button: Arc<dyn Button>,
    /// Status LEDs.
    pub led: Arc<dyn Led>,
    /// Millisecond tick.
    pub clock: Arc<dyn Clock>,
    /// Scheduler run-time counters.
    pub counters: Arc<dyn RunTimeCounters>,
}

/// State shared by the interrupt handlers and the tasks.
pub struct PipelineContext {
    camera: Arc<dyn Camera>,
    capture: CaptureRing,
    nn_input: Mutex<Producer<DmaBuffer>>,
    isp_wake: CountingSemaphore,
    stats: Arc<StatsAggregator>,
    dropped_frames: AtomicU64,
    collapsed_vsyncs: AtomicU64,
    on_fatal: FatalHandler,
}

impl PipelineContext {
    /// Timing statistics and CPU load.
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Display-pipe capture ring.
    #[must_use]
    pub fn capture(&self) -> &CaptureRing {
        &self.capture
    }

    /// Ancillary frames dropped because no input buffer was free.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Vsyncs that found an ISP wake already pending.
    #[must_use]
    pub fn collapsed_vsyncs(&self) -> u64 {
        self.collapsed_vsyncs.load(Ordering::Relaxed)
    }

    /// Pending ISP wakes (0 or 1).
    #[must_use]
    pub fn pending_isp_wakes(&self) -> usize {
        self.isp_wake.count()
    }

    fn fatal(&self, err: PipelineError) {
        error!(error = %err, "unrecoverable pipeline error");
        (self.on_fatal)(&err);
    }
}

/// Running pipeline.
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    tasks: Vec<(TaskSpec, JoinHandle<()>)>,
}

impl Pipeline {
    /// Builds every stage and starts the tasks.
    ///
    /// `models` are registered in order; the first becomes the active
    /// model and `postprocessor` must decode its output. Networks are
    /// `'static` because the registry moves into the inference task.
    pub fn start(
        config: &VisionConfig,
        hw: PipelineHardware,
        models: Vec<ModelConfig<'static>>,
        postprocessor: Box<dyn Postprocessor>,
        on_fatal: FatalHandler,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let stats = Arc::new(StatsAggregator::new(
            Arc::clone(&hw.clock),
            Arc::clone(&hw.counters),
        ));

        let mut registry = ModelRegistry::new(Arc::clone(&hw.npu));
        registry.init();
        for model in models {
            registry.register(model)?;
        }
        let (input_len, output_len) = check_active_model(config, &registry, postprocessor.as_ref())?;

        let (input_producer, input_consumer) = BufferQueue::new(&DmaBuffer::alloc_set(
            MAX_BUFFERS,
            registry.max_input_size(),
        )?)?;
        let (output_producer, output_consumer) = BufferQueue::new(&DmaBuffer::alloc_set(
            MAX_BUFFERS,
            registry.max_output_size(),
        )?)?;
        let capture = CaptureRing::allocate(config.camera.capture_delay, config.camera.frame_len())?;
        let display = DisplayService::new(config, &hw, Arc::clone(&stats))?;

        let ctx = Arc::new(PipelineContext {
            camera: Arc::clone(&hw.camera),
            capture,
            nn_input: Mutex::new(input_producer),
            isp_wake: CountingSemaphore::new(0, 1),
            stats,
            dropped_frames: AtomicU64::new(0),
            collapsed_vsyncs: AtomicU64::new(0),
            on_fatal,
        });

        hw.camera
            .set_event_handler(Arc::new(CameraIsr::new(Arc::clone(&ctx))));
        hw.camera.start(
            Pipe::Main,
            ctx.capture.capture_buffer(),
            CaptureMode::Continuous,
        )?;
        info!(
            slots = ctx.capture.len(),
            delay = config.camera.capture_delay,
            "display pipe streaming"
        );

        let stack = config.tasks.stack_size;
        let nn = NnTask {
            ctx: Arc::clone(&ctx),
            input: input_consumer,
            output: output_producer,
            registry,
            cache: CacheMaintenance::new(Arc::clone(&hw.cache)),
        };
        let dp = DisplayTask {
            ctx: Arc::clone(&ctx),
            output: output_consumer,
            output_len,
            postprocessor,
            display,
        };
        let isp_ctx = Arc::clone(&ctx);

        let tasks = vec![
            (NN_TASK, tasks::spawn(NN_TASK, stack, move || nn.run())?),
            (DISPLAY_TASK, tasks::spawn(DISPLAY_TASK, stack, move || dp.run())?),
            (ISP_TASK, tasks::spawn(ISP_TASK, stack, move || tasks::isp_task(isp_ctx))?),
        ];

        hw.led.set(LedColor::Green, true);
        info!(input_len, output_len, "pipeline started");
        Ok(Self { ctx, tasks })
    }

    /// Shared pipeline state.
    #[must_use]
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Timing statistics and CPU load.
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.ctx.stats
    }

    /// Tasks that have returned, which only happens after a fatal error.
    #[must_use]
    pub fn stopped_tasks(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(spec, _)| spec.name)
            .collect()
    }

    /// Specs of the running pipeline's tasks, in start order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskSpec> {
        self.tasks.iter().map(|(spec, _)| *spec).collect()
    }
}

/// Checks that the active model matches the decoder and the configured
/// input frame. Returns the model's input and output tensor sizes.
fn check_active_model(
    config: &VisionConfig,
    registry: &ModelRegistry<'_>,
    postprocessor: &dyn Postprocessor,
) -> PipelineResult<(usize, usize)> {
    let model = registry
        .active()
        .ok_or_else(|| PipelineError::Invalid("no model registered".into()))?;
    if model.postprocess() != postprocessor.kind() {
        return Err(PipelineError::Invalid(format!(
            "model '{}' needs a {:?} decoder, got {:?}",
            model.name(),
            model.postprocess(),
            postprocessor.kind()
        )));
    }
    let frame = config.nn.input_len();
    if model.input_size() != frame {
        return Err(PipelineError::Invalid(format!(
            "model '{}' expects {} input bytes, nn frame {}x{}x{} is {frame}",
            model.name(),
            model.input_size(),
            config.nn.width,
            config.nn.height,
            config.nn.bpp
        )));
    }
    Ok((model.input_size(), model.output_size()))
}
