//! Simulated board: one set of mock peripherals wired for the pipeline.
//!
//! Used by the command-line runner and by tests. Fields keep the concrete
//! mock types so callers can drive and inspect them; [`SimulatedBoard::hardware`]
//! hands the same instances to the pipeline as trait objects.

use crate::config::VisionConfig;
use crate::error::PipelineResult;
use crate::pipeline::PipelineHardware;
use std::sync::Arc;
use std::time::Duration;
use vision_driver_mock::{
    detection_tensor_len, MockBlitter, MockButton, MockCache, MockCamera, MockEncoder, MockLed,
    MockNetwork, MockNpuRuntime, MockRasterizer, MockRunTimeCounters, MockStreamSink, SystemClock,
};
use vision_hal::PostprocessKind;
use vision_nn::ModelConfig;

/// Most detections the simulated accelerator writes per run.
pub const MAX_SIMULATED_DETECTIONS: usize = 3;

const ENCODED_FRAME_LEN: usize = 1024;

/// Mock peripherals for one pipeline.
pub struct SimulatedBoard {
    /// Camera.
    pub camera: Arc<MockCamera>,
    /// Accelerator runtime.
    pub npu: Arc<MockNpuRuntime>,
    /// Data cache.
    pub cache: Arc<MockCache>,
    /// 2D compositor.
    pub blitter: Arc<MockBlitter>,
    /// Text rendering.
    pub fonts: Arc<MockRasterizer>,
    /// Video encoder.
    pub encoder: Arc<MockEncoder>,
    /// USB video sink.
    pub sink: Arc<MockStreamSink>,
    /// User button.
    pub button: Arc<MockButton>,
    /// Status LEDs.
    pub led: Arc<MockLed>,
    /// Wall clock.
    pub clock: Arc<SystemClock>,
    /// Run-time counters.
    pub counters: Arc<MockRunTimeCounters>,
}

impl SimulatedBoard {
    /// Free-running board paced by `config`: the camera runs at
    /// `camera.fps`, inference and USB release take the simulated times.
    pub fn new(config: &VisionConfig) -> PipelineResult<Self> {
        let sim = &config.simulation;
        Self::build(
            MockCamera::new(config.camera.fps),
            MockNpuRuntime::with_timing(Duration::from_millis(sim.inference_ms), sim.seed),
            Some(Duration::from_millis(sim.uvc_release_ms)),
            sim.cpu_load_percent,
        )
    }

    /// Board whose camera and USB host only act when told to.
    pub fn manual() -> PipelineResult<Self> {
        Self::build(MockCamera::manual(), MockNpuRuntime::new(), None, 0.0)
    }

    /// Board with a manual camera and USB host but a slow accelerator.
    pub fn manual_with_inference(inference: Duration) -> PipelineResult<Self> {
        Self::build(
            MockCamera::manual(),
            MockNpuRuntime::with_timing(inference, Some(7)),
            None,
            0.0,
        )
    }

    fn build(
        camera: MockCamera,
        npu: MockNpuRuntime,
        uvc_release: Option<Duration>,
        cpu_load: f32,
    ) -> PipelineResult<Self> {
        Ok(Self {
            camera: Arc::new(camera),
            npu: Arc::new(npu),
            cache: Arc::new(MockCache::new()),
            blitter: Arc::new(MockBlitter::new(Duration::ZERO)?),
            fonts: Arc::new(MockRasterizer::new()),
            encoder: Arc::new(MockEncoder::new(ENCODED_FRAME_LEN)),
            sink: Arc::new(MockStreamSink::new(uvc_release)?),
            button: Arc::new(MockButton::new()),
            led: Arc::new(MockLed::new()),
            clock: Arc::new(SystemClock::new()),
            counters: Arc::new(MockRunTimeCounters::new(cpu_load)),
        })
    }

    /// The same peripherals as trait objects.
    #[must_use]
    pub fn hardware(&self) -> PipelineHardware {
        PipelineHardware {
            camera: self.camera.clone(),
            npu: self.npu.clone(),
            cache: self.cache.clone(),
            blitter: self.blitter.clone(),
            fonts: self.fonts.clone(),
            encoder: self.encoder.clone(),
            sink: self.sink.clone(),
            button: self.button.clone(),
            led: self.led.clone(),
            clock: self.clock.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// Detector network matching `config.nn`, leaked so it outlives the
/// pipeline.
#[must_use]
pub fn detector_network(config: &VisionConfig) -> &'static MockNetwork {
    Box::leak(Box::new(MockNetwork::detector(
        "mock_detector",
        config.nn.input_len(),
        detection_tensor_len(MAX_SIMULATED_DETECTIONS),
    )))
}

/// Model configuration for a network from [`detector_network`].
#[must_use]
pub fn detector_model(network: &'static MockNetwork) -> ModelConfig<'static> {
    ModelConfig::new(network, PostprocessKind::YoloV2)
}
