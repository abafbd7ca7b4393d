//! Display service: overlay composition, encode and USB streaming.
//!
//! Runs inside the display task. Each rendered frame gets the detection
//! boxes and status lines drawn by the hardware compositor, is encoded, and
//! is handed to the USB sink unless the previous frame is still in flight.
//! A frame encoded while another is in flight is dropped and the next encode
//! is forced intra, as is the first encode after the host opens the stream.

pub mod compositor;
pub mod overlay;

pub use compositor::Compositor;
pub use overlay::{DrawOp, OverlayLayout, PixelRect};

use crate::config::VisionConfig;
use crate::error::PipelineResult;
use crate::pipeline::PipelineHardware;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vision_hal::{
    Button, CacheMaintenance, Detection, DmaBuffer, FrameEncoder, Led, LedColor, StreamEvents,
    StreamSink, Surface,
};
use vision_stats::{Metric, StatsAggregator};

// =============================================================================
// Stream state
// =============================================================================

/// Host streaming state, updated from the USB sink callbacks.
pub struct StreamState {
    active: AtomicBool,
    in_flight: AtomicBool,
    led: Arc<dyn Led>,
}

impl StreamState {
    /// Inactive stream with nothing in flight.
    pub fn new(led: Arc<dyn Led>) -> Self {
        Self {
            active: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            led,
        }
    }

    /// Whether a host is receiving the stream.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a frame was handed to the sink and not yet released.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl StreamEvents for StreamState {
    fn on_streaming_active(&self) {
        self.active.store(true, Ordering::Release);
        self.led.set(LedColor::Red, true);
    }

    fn on_streaming_inactive(&self) {
        self.active.store(false, Ordering::Release);
        self.led.set(LedColor::Red, false);
    }

    fn on_frame_release(&self) {
        if !self.in_flight.swap(false, Ordering::AcqRel) {
            warn!("frame release without a frame in flight");
        }
    }
}

// =============================================================================
// Debug overlay toggle
// =============================================================================

/// Flips on each released-to-pressed transition of the user button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugToggle {
    enabled: bool,
    was_pressed: bool,
}

impl DebugToggle {
    /// Toggle starting in `enabled` with the button released.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            was_pressed: false,
        }
    }

    /// Feeds the current button level; returns whether the overlay is on.
    pub fn update(&mut self, pressed: bool) -> bool {
        if pressed && !self.was_pressed {
            self.enabled = !self.enabled;
            debug!(enabled = self.enabled, "debug overlay toggled");
        }
        self.was_pressed = pressed;
        self.enabled
    }

    /// Current state.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// =============================================================================
// Display service
// =============================================================================

enum Encoded {
    Ready(usize),
    Empty,
    Discarded,
    Failed,
}

/// Overlay, encode and stream stage of the display task.
pub struct DisplayService {
    compositor: Compositor,
    layout: OverlayLayout,
    encoder: Arc<dyn FrameEncoder>,
    sink: Arc<dyn StreamSink>,
    button: Arc<dyn Button>,
    cache: CacheMaintenance,
    stats: Arc<StatsAggregator>,
    stream: Arc<StreamState>,
    enc_out: DmaBuffer,
    uvc_in: DmaBuffer,
    width: u32,
    height: u32,
    toggle: DebugToggle,
    was_active: bool,
    force_intra: bool,
}

impl DisplayService {
    /// Sets up the compositor, encoder buffers and sink callbacks.
    pub fn new(
        config: &VisionConfig,
        hw: &PipelineHardware,
        stats: Arc<StatsAggregator>,
    ) -> PipelineResult<Self> {
        let compositor = Compositor::new(Arc::clone(&hw.blitter), Arc::clone(&hw.fonts))?;
        let (width, height) = (config.camera.display_width, config.camera.display_height);
        let layout = OverlayLayout::new(width, height, hw.fonts.as_ref());

        let enc_out = DmaBuffer::alloc(config.display.encoder_buffer_size)?;
        let uvc_in = DmaBuffer::alloc(config.display.encoder_buffer_size)?;

        let stream = Arc::new(StreamState::new(Arc::clone(&hw.led)));
        hw.sink
            .set_event_handler(Arc::clone(&stream) as Arc<dyn StreamEvents>);
        info!(
            width,
            height,
            encoder_buffer = config.display.encoder_buffer_size,
            "display service ready"
        );

        Ok(Self {
            compositor,
            layout,
            encoder: Arc::clone(&hw.encoder),
            sink: Arc::clone(&hw.sink),
            button: Arc::clone(&hw.button),
            cache: CacheMaintenance::new(Arc::clone(&hw.cache)),
            stats,
            stream,
            enc_out,
            uvc_in,
            width,
            height,
            toggle: DebugToggle::new(config.display.debug_overlay),
            was_active: false,
            force_intra: false,
        })
    }

    /// Streaming state shared with the sink.
    #[must_use]
    pub fn stream(&self) -> &Arc<StreamState> {
        &self.stream
    }

    /// Whether the timing table is drawn.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    /// Whether the next encode will be forced intra because a frame was
    /// dropped.
    #[must_use]
    pub fn force_intra_pending(&self) -> bool {
        self.force_intra
    }

    /// Draws the overlay into `frame`, encodes it and sends it when a host
    /// is streaming. Returns whether a frame was rendered.
    pub fn render(&mut self, frame: DmaBuffer, detections: &[Detection]) -> PipelineResult<bool> {
        let debug = self.toggle.update(self.button.is_pressed());

        if !self.stream.is_active() {
            self.was_active = false;
            return Ok(false);
        }

        let surface = Surface {
            buffer: frame,
            width: self.width,
            height: self.height,
        };
        let (stats, layout, compositor) = (&self.stats, &self.layout, &self.compositor);
        stats.time(Metric::DisplayRender, || {
            let ops = layout.build(detections, &stats.snapshot(), &stats.cpu_load(), debug);
            compositor.draw(surface, &ops)
        })?;

        let force_intra = !self.was_active || self.force_intra;
        let encoded = self
            .stats
            .time(Metric::DisplayEncode, || self.encode(surface, force_intra));

        self.force_intra = matches!(encoded, Encoded::Discarded | Encoded::Failed);
        if let Encoded::Ready(len) = encoded {
            self.send(len);
        }
        self.was_active = true;
        Ok(true)
    }

    fn encode(&self, frame: Surface, force_intra: bool) -> Encoded {
        // SAFETY: the display slot of the capture ring is not written by the
        // camera, and the compositor finished every operation on it.
        let src = unsafe { &frame.buffer.as_slice()[..frame.byte_len()] };
        // SAFETY: the encoder output buffer is private to this task.
        let out = unsafe { self.enc_out.as_mut_slice() };

        match self.encoder.encode(src, out, force_intra) {
            Err(e) => {
                warn!(error = %e, "encode failed, frame skipped");
                Encoded::Failed
            }
            Ok(0) => Encoded::Empty,
            Ok(_) if self.stream.is_in_flight() => {
                debug!("previous frame still in flight, encoded frame dropped");
                Encoded::Discarded
            }
            Ok(len) => {
                // SAFETY: nothing is in flight, so the sink is not reading
                // the transmit buffer.
                let tx = unsafe { self.uvc_in.as_mut_slice() };
                tx[..len].copy_from_slice(&out[..len]);
                self.cache.clean(self.uvc_in.addr(), len);
                Encoded::Ready(len)
            }
        }
    }

    fn send(&self, len: usize) {
        self.stream.in_flight.store(true, Ordering::Release);
        if let Err(e) = self.sink.show_frame(self.uvc_in, len) {
            self.stream.in_flight.store(false, Ordering::Release);
            warn!(error = %e, len, "stream sink rejected frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedBoard;
    use tracing_test::traced_test;
    use vision_driver_mock::{CacheOpKind, MockLed, INTRA_MARKER, PREDICTED_MARKER};

    fn small_config() -> VisionConfig {
        let mut config = VisionConfig::default();
        config.camera.display_width = 320;
        config.camera.display_height = 240;
        config.display.encoder_buffer_size = 4096;
        config
    }

    fn service(board: &SimulatedBoard, config: &VisionConfig) -> (DisplayService, DmaBuffer) {
        let stats = Arc::new(StatsAggregator::new(
            board.clock.clone(),
            board.counters.clone(),
        ));
        let display = DisplayService::new(config, &board.hardware(), stats).unwrap();
        let frame = DmaBuffer::alloc(config.camera.frame_len()).unwrap();
        (display, frame)
    }

    fn one_box() -> Vec<Detection> {
        vec![Detection {
            x_center: 0.5,
            y_center: 0.5,
            width: 0.25,
            height: 0.25,
            confidence: 0.75,
            class_index: 1,
        }]
    }

    #[test]
    #[traced_test]
    fn stray_release_is_logged_and_ignored() {
        let stream = StreamState::new(Arc::new(MockLed::new()));
        stream.on_frame_release();
        assert!(!stream.is_in_flight());
        assert!(logs_contain("frame release without a frame in flight"));
    }

    #[test]
    fn nothing_is_rendered_without_a_host() {
        let board = SimulatedBoard::manual().unwrap();
        let (mut display, frame) = service(&board, &small_config());

        assert!(!display.render(frame, &one_box()).unwrap());
        assert_eq!(board.blitter.fills(), 0);
        assert_eq!(board.encoder.encodes(), 0);
    }

    #[test]
    fn streaming_state_drives_the_red_led() {
        let board = SimulatedBoard::manual().unwrap();
        let (display, _) = service(&board, &small_config());

        board.sink.set_streaming(true);
        assert!(display.stream().is_active());
        assert!(board.led.is_on(LedColor::Red));

        board.sink.set_streaming(false);
        assert!(!display.stream().is_active());
        assert!(!board.led.is_on(LedColor::Red));
    }

    #[test]
    fn first_frame_after_stream_start_is_intra() {
        let board = SimulatedBoard::manual().unwrap();
        let (mut display, frame) = service(&board, &small_config());
        board.sink.set_streaming(true);

        assert!(display.render(frame, &one_box()).unwrap());
        assert_eq!(board.sink.frames_shown(), 1);
        assert_eq!(board.sink.last_frame()[0], INTRA_MARKER);
        assert!(board.blitter.fills() >= 4);
        assert!(board.blitter.blends() >= 3);

        board.sink.release();
        display.render(frame, &one_box()).unwrap();
        assert_eq!(board.sink.last_frame()[0], PREDICTED_MARKER);

        // a restart of the stream forces intra again
        board.sink.release();
        board.sink.set_streaming(false);
        assert!(!display.render(frame, &[]).unwrap());
        board.sink.set_streaming(true);
        display.render(frame, &[]).unwrap();
        assert_eq!(board.sink.last_frame()[0], INTRA_MARKER);
    }

    #[test]
    fn frame_in_flight_drops_encode_and_forces_intra() {
        let board = SimulatedBoard::manual().unwrap();
        let (mut display, frame) = service(&board, &small_config());
        board.sink.set_streaming(true);

        display.render(frame, &[]).unwrap();
        assert!(display.stream().is_in_flight());

        // not released: the next frame is encoded but not sent
        display.render(frame, &[]).unwrap();
        assert_eq!(board.sink.frames_shown(), 1);
        assert_eq!(board.encoder.encodes(), 2);
        assert!(display.force_intra_pending());

        board.sink.release();
        assert!(!display.stream().is_in_flight());
        display.render(frame, &[]).unwrap();
        assert!(board.encoder.last_force_intra());
        assert_eq!(board.sink.frames_shown(), 2);
        assert!(!display.force_intra_pending());
    }

    #[test]
    fn button_edge_toggles_debug_table() {
        let board = SimulatedBoard::manual().unwrap();
        let (mut display, frame) = service(&board, &small_config());
        board.sink.set_streaming(true);

        display.render(frame, &[]).unwrap();
        assert!(!display.debug_enabled());
        let plain = board.fonts.take_rendered().len();

        board.button.set_pressed(true);
        board.sink.release();
        display.render(frame, &[]).unwrap();
        assert!(display.debug_enabled());
        assert_eq!(board.fonts.take_rendered().len(), plain + 6);

        // held down: no further toggles
        board.sink.release();
        display.render(frame, &[]).unwrap();
        assert!(display.debug_enabled());

        board.button.set_pressed(false);
        display.render(frame, &[]).unwrap();
        assert!(display.debug_enabled());

        board.button.set_pressed(true);
        display.render(frame, &[]).unwrap();
        assert!(!display.debug_enabled());
    }

    #[test]
    fn toggle_detects_only_rising_edges() {
        let mut toggle = DebugToggle::new(false);
        let levels = [false, true, true, false, true, false, false, true];
        let states: Vec<bool> = levels.iter().map(|&p| toggle.update(p)).collect();
        assert_eq!(
            states,
            vec![false, true, true, true, false, false, false, true]
        );
    }

    #[test]
    fn transmit_buffer_is_cleaned_before_sending() {
        let board = SimulatedBoard::manual().unwrap();
        let (mut display, frame) = service(&board, &small_config());
        board.sink.set_streaming(true);

        display.render(frame, &[]).unwrap();
        assert!(board
            .cache
            .ops()
            .iter()
            .any(|op| op.kind == CacheOpKind::Clean));
    }

    #[test]
    fn sink_failure_is_not_fatal() {
        let board = SimulatedBoard::manual().unwrap();
        let (mut display, frame) = service(&board, &small_config());
        board.sink.set_streaming(true);
        board.sink.faults().set(true);

        assert!(display.render(frame, &[]).unwrap());
        assert!(!display.stream().is_in_flight());
        assert_eq!(board.sink.frames_shown(), 0);
    }
}
