//! Simulated camera with a main and an ancillary pipe.
//!
//! Free-running mode spawns a frame thread once the first pipe starts. Each
//! period it raises, for every running pipe, a vsync followed by a
//! frame-complete event. Ancillary frames are stamped with a test pattern
//! before the event fires; main-pipe frames are left untouched since the
//! display side renders into those buffers.
//!
//! Manual mode never spawns a thread; tests drive events with
//! [`MockCamera::emit_frame`] and [`MockCamera::emit_vsync`].

use crate::fault::FaultInjector;
use crate::pattern::fill_test_pattern;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};
use vision_hal::{Camera, CameraEvents, CaptureMode, DmaBuffer, HalError, HalErrorKind, Pipe};

#[derive(Debug, Default, Clone, Copy)]
struct PipeState {
    dst: Option<DmaBuffer>,
    mode: CaptureMode,
    running: bool,
}

fn pipe_index(pipe: Pipe) -> usize {
    match pipe {
        Pipe::Main => 0,
        Pipe::Ancillary => 1,
    }
}

struct CameraShared {
    handler: Mutex<Option<Arc<dyn CameraEvents>>>,
    pipes: Mutex<[PipeState; 2]>,
    frames: [AtomicU64; 2],
    vsyncs: AtomicU64,
    isp_updates: AtomicU64,
    stopped: AtomicBool,
    fail_update: FaultInjector,
    fail_isp: FaultInjector,
}

impl CameraShared {
    fn handler(&self) -> Option<Arc<dyn CameraEvents>> {
        self.handler.lock().clone()
    }

    fn emit_vsync(&self, pipe: Pipe) {
        if pipe == Pipe::Main {
            self.vsyncs.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(handler) = self.handler() {
            handler.on_vsync_event(pipe);
        }
    }

    fn emit_frame(&self, pipe: Pipe) {
        let idx = pipe_index(pipe);
        let frame_num = self.frames[idx].fetch_add(1, Ordering::Relaxed);

        let dst = {
            let mut pipes = self.pipes.lock();
            let state = &mut pipes[idx];
            if state.mode == CaptureMode::Snapshot {
                state.running = false;
            }
            state.dst
        };

        if let (Pipe::Ancillary, Some(dst)) = (pipe, dst) {
            // SAFETY: the ancillary destination is owned by the capture side
            // (acquired from the free pool and not yet published) until the
            // frame event below repoints it.
            fill_test_pattern(unsafe { dst.as_mut_slice() }, frame_num);
        }

        if let Some(handler) = self.handler() {
            handler.on_frame_event(pipe);
        }
    }

    fn running(&self) -> [bool; 2] {
        let pipes = self.pipes.lock();
        [pipes[0].running, pipes[1].running]
    }
}

/// Simulated dual-pipe camera.
pub struct MockCamera {
    shared: Arc<CameraShared>,
    period: Option<Duration>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MockCamera {
    fn build(period: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(CameraShared {
                handler: Mutex::new(None),
                pipes: Mutex::new([PipeState::default(); 2]),
                frames: [AtomicU64::new(0), AtomicU64::new(0)],
                vsyncs: AtomicU64::new(0),
                isp_updates: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                fail_update: FaultInjector::new("camera", "update_address"),
                fail_isp: FaultInjector::new("camera", "isp_update"),
            }),
            period,
            worker: Mutex::new(None),
        }
    }

    /// Free-running camera at `fps` frames per second.
    pub fn new(fps: u32) -> Self {
        Self::build(Some(Duration::from_secs(1) / fps.max(1)))
    }

    /// Camera that only raises events when told to.
    pub fn manual() -> Self {
        Self::build(None)
    }

    /// Raises a frame-complete event for `pipe` now.
    pub fn emit_frame(&self, pipe: Pipe) {
        self.shared.emit_frame(pipe);
    }

    /// Raises a vsync event for `pipe` now.
    pub fn emit_vsync(&self, pipe: Pipe) {
        self.shared.emit_vsync(pipe);
    }

    /// Frame events raised so far on `pipe`.
    pub fn frames(&self, pipe: Pipe) -> u64 {
        self.shared.frames[pipe_index(pipe)].load(Ordering::Relaxed)
    }

    /// Main-pipe vsync events raised so far.
    pub fn vsyncs(&self) -> u64 {
        self.shared.vsyncs.load(Ordering::Relaxed)
    }

    /// Calls to [`Camera::isp_update`].
    pub fn isp_updates(&self) -> u64 {
        self.shared.isp_updates.load(Ordering::Relaxed)
    }

    /// Current destination of `pipe`.
    pub fn current_address(&self, pipe: Pipe) -> Option<DmaBuffer> {
        self.shared.pipes.lock()[pipe_index(pipe)].dst
    }

    /// Whether `pipe` is capturing.
    pub fn is_running(&self, pipe: Pipe) -> bool {
        self.shared.running()[pipe_index(pipe)]
    }

    /// Failure injection for `update_address`.
    pub fn update_faults(&self) -> &FaultInjector {
        &self.shared.fail_update
    }

    /// Failure injection for `isp_update`.
    pub fn isp_faults(&self) -> &FaultInjector {
        &self.shared.fail_isp
    }

    /// Stops the frame thread; no further events are raised.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn spawn_worker(&self, period: Duration) -> Result<(), HalError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("mock-camera".into())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "mock camera streaming");
                while !shared.stopped.load(Ordering::Acquire) {
                    thread::sleep(period);
                    let running = shared.running();
                    for pipe in [Pipe::Main, Pipe::Ancillary] {
                        if running[pipe_index(pipe)] {
                            shared.emit_vsync(pipe);
                            shared.emit_frame(pipe);
                        }
                    }
                }
                debug!("mock camera stopped");
            })
            .map_err(|e| HalError::new("camera", HalErrorKind::Initialization, e.to_string()))?;
        *worker = Some(handle);
        Ok(())
    }
}

impl Camera for MockCamera {
    fn set_event_handler(&self, handler: Arc<dyn CameraEvents>) {
        *self.shared.handler.lock() = Some(handler);
    }

    fn start(&self, pipe: Pipe, dst: DmaBuffer, mode: CaptureMode) -> Result<(), HalError> {
        if self.shared.handler.lock().is_none() {
            return Err(HalError::new(
                "camera",
                HalErrorKind::NotReady,
                "no event handler installed",
            ));
        }
        {
            let mut pipes = self.shared.pipes.lock();
            pipes[pipe_index(pipe)] = PipeState {
                dst: Some(dst),
                mode,
                running: true,
            };
        }
        info!(pipe = pipe.label(), ?mode, "capture started");
        match self.period {
            Some(period) => self.spawn_worker(period),
            None => Ok(()),
        }
    }

    fn update_address(&self, pipe: Pipe, dst: DmaBuffer) -> Result<(), HalError> {
        self.shared.fail_update.check()?;
        let mut pipes = self.shared.pipes.lock();
        let state = &mut pipes[pipe_index(pipe)];
        if !state.running && state.dst.is_none() {
            return Err(HalError::new(
                "camera",
                HalErrorKind::NotReady,
                format!("{} pipe not started", pipe.label()),
            ));
        }
        state.dst = Some(dst);
        Ok(())
    }

    fn isp_update(&self) -> Result<(), HalError> {
        self.shared.fail_isp.check()?;
        self.shared.isp_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::frame_tag;
    use std::time::Instant;

    #[derive(Default)]
    struct Counting {
        frames: [AtomicU64; 2],
        vsyncs: [AtomicU64; 2],
    }

    impl CameraEvents for Counting {
        fn on_frame_event(&self, pipe: Pipe) {
            self.frames[pipe_index(pipe)].fetch_add(1, Ordering::SeqCst);
        }
        fn on_vsync_event(&self, pipe: Pipe) {
            self.vsyncs[pipe_index(pipe)].fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn start_requires_handler() {
        let cam = MockCamera::manual();
        let buf = DmaBuffer::alloc(64).unwrap();
        let err = cam
            .start(Pipe::Main, buf, CaptureMode::Continuous)
            .unwrap_err();
        assert_eq!(err.kind, HalErrorKind::NotReady);
    }

    #[test]
    fn manual_events_reach_handler_and_stamp_ancillary() {
        let cam = MockCamera::manual();
        let events = Arc::new(Counting::default());
        cam.set_event_handler(events.clone());

        let buf = DmaBuffer::alloc(64).unwrap();
        cam.start(Pipe::Ancillary, buf, CaptureMode::Continuous)
            .unwrap();
        cam.emit_frame(Pipe::Ancillary);
        cam.emit_frame(Pipe::Ancillary);
        cam.emit_vsync(Pipe::Main);

        assert_eq!(events.frames[1].load(Ordering::SeqCst), 2);
        assert_eq!(events.vsyncs[0].load(Ordering::SeqCst), 1);
        assert_eq!(frame_tag(unsafe { buf.as_slice() }), Some(1));
        assert_eq!(cam.vsyncs(), 1);
    }

    #[test]
    fn update_address_requires_started_pipe() {
        let cam = MockCamera::manual();
        cam.set_event_handler(Arc::new(Counting::default()));
        let a = DmaBuffer::alloc(32).unwrap();
        let b = DmaBuffer::alloc(32).unwrap();

        assert!(cam.update_address(Pipe::Main, a).is_err());
        cam.start(Pipe::Main, a, CaptureMode::Continuous).unwrap();
        cam.update_address(Pipe::Main, b).unwrap();
        assert_eq!(cam.current_address(Pipe::Main), Some(b));

        cam.update_faults().set(true);
        assert!(cam.update_address(Pipe::Main, a).is_err());
    }

    #[test]
    fn snapshot_stops_after_one_frame() {
        let cam = MockCamera::manual();
        cam.set_event_handler(Arc::new(Counting::default()));
        cam.start(
            Pipe::Main,
            DmaBuffer::alloc(32).unwrap(),
            CaptureMode::Snapshot,
        )
        .unwrap();
        assert!(cam.is_running(Pipe::Main));
        cam.emit_frame(Pipe::Main);
        assert!(!cam.is_running(Pipe::Main));
    }

    #[test]
    fn free_running_camera_emits_on_started_pipes() {
        let cam = MockCamera::new(200);
        let events = Arc::new(Counting::default());
        cam.set_event_handler(events.clone());
        cam.start(
            Pipe::Main,
            DmaBuffer::alloc(32).unwrap(),
            CaptureMode::Continuous,
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while events.frames[0].load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        cam.stop();

        assert!(events.frames[0].load(Ordering::SeqCst) >= 3);
        assert!(events.vsyncs[0].load(Ordering::SeqCst) >= 3);
        assert_eq!(events.frames[1].load(Ordering::SeqCst), 0);
    }
}
