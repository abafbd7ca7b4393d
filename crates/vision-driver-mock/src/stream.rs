//! Video encoder and USB video sink stand-ins.

use crate::fault::FaultInjector;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};
use vision_hal::{DmaBuffer, FrameEncoder, HalError, HalErrorKind, StreamEvents, StreamSink};

/// First byte of every encoded frame.
pub const INTRA_MARKER: u8 = 0x65;
/// First byte of every encoded predicted frame.
pub const PREDICTED_MARKER: u8 = 0x41;

/// Encoder that emits a marker byte plus a sparse copy of the frame.
#[derive(Debug)]
pub struct MockEncoder {
    output_len: AtomicUsize,
    encodes: AtomicU64,
    intra: AtomicU64,
    last_force_intra: AtomicBool,
    faults: FaultInjector,
}

impl MockEncoder {
    /// Encoder producing `output_len` bytes per frame (0 = never any output).
    pub fn new(output_len: usize) -> Self {
        Self {
            output_len: AtomicUsize::new(output_len),
            encodes: AtomicU64::new(0),
            intra: AtomicU64::new(0),
            last_force_intra: AtomicBool::new(false),
            faults: FaultInjector::new("encoder", "encode"),
        }
    }

    /// Changes the per-frame output length.
    pub fn set_output_len(&self, len: usize) {
        self.output_len.store(len, Ordering::SeqCst);
    }

    /// Frames encoded so far.
    pub fn encodes(&self) -> u64 {
        self.encodes.load(Ordering::SeqCst)
    }

    /// Frames encoded as intra so far.
    pub fn intra_frames(&self) -> u64 {
        self.intra.load(Ordering::SeqCst)
    }

    /// Whether the most recent encode was asked for an intra frame.
    pub fn last_force_intra(&self) -> bool {
        self.last_force_intra.load(Ordering::SeqCst)
    }

    /// Failure injection.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

impl FrameEncoder for MockEncoder {
    fn encode(&self, frame: &[u8], out: &mut [u8], force_intra: bool) -> Result<usize, HalError> {
        self.faults.check()?;
        let n = self.output_len.load(Ordering::SeqCst).min(out.len());
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.last_force_intra.store(force_intra, Ordering::SeqCst);
        if force_intra {
            self.intra.fetch_add(1, Ordering::SeqCst);
        }
        if n == 0 {
            return Ok(0);
        }
        out[0] = if force_intra {
            INTRA_MARKER
        } else {
            PREDICTED_MARKER
        };
        let stride = (frame.len() / n).max(1);
        for (i, byte) in out[1..n].iter_mut().enumerate() {
            *byte = frame.get(i * stride).copied().unwrap_or(0);
        }
        Ok(n)
    }
}

// =============================================================================
// Streaming sink
// =============================================================================

/// USB video sink that "transmits" frames on a worker thread.
///
/// With a release delay the worker reports `on_frame_release` that long after
/// each `show_frame`; without one, frames stay in flight until
/// [`MockStreamSink::release`] is called.
pub struct MockStreamSink {
    handler: Arc<Mutex<Option<Arc<dyn StreamEvents>>>>,
    releases: Option<Mutex<Sender<()>>>,
    shown: AtomicU64,
    shown_bytes: AtomicU64,
    last_frame: Mutex<Vec<u8>>,
    faults: FaultInjector,
}

impl MockStreamSink {
    /// Sink releasing each frame after `release_delay`, or never on its own
    /// when `None`.
    pub fn new(release_delay: Option<Duration>) -> Result<Self, HalError> {
        let handler: Arc<Mutex<Option<Arc<dyn StreamEvents>>>> = Arc::new(Mutex::new(None));
        let releases = match release_delay {
            Some(delay) => {
                let (tx, rx) = mpsc::channel::<()>();
                let worker_handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name("mock-uvc".into())
                    .spawn(move || {
                        for () in rx {
                            thread::sleep(delay);
                            let target = worker_handler.lock().clone();
                            if let Some(h) = target {
                                h.on_frame_release();
                            }
                        }
                    })
                    .map_err(|e| {
                        HalError::new("uvc", HalErrorKind::Initialization, e.to_string())
                    })?;
                Some(Mutex::new(tx))
            }
            None => None,
        };
        Ok(Self {
            handler,
            releases,
            shown: AtomicU64::new(0),
            shown_bytes: AtomicU64::new(0),
            last_frame: Mutex::new(Vec::new()),
            faults: FaultInjector::new("uvc", "show_frame"),
        })
    }

    fn handler(&self) -> Option<Arc<dyn StreamEvents>> {
        self.handler.lock().clone()
    }

    /// Simulates a host opening (`true`) or closing the stream.
    pub fn set_streaming(&self, active: bool) {
        info!(active, "uvc streaming state changed");
        if let Some(h) = self.handler() {
            if active {
                h.on_streaming_active();
            } else {
                h.on_streaming_inactive();
            }
        }
    }

    /// Releases the frame in flight now.
    pub fn release(&self) {
        if let Some(h) = self.handler() {
            h.on_frame_release();
        }
    }

    /// Frames accepted by `show_frame`.
    pub fn frames_shown(&self) -> u64 {
        self.shown.load(Ordering::SeqCst)
    }

    /// Bytes accepted by `show_frame`.
    pub fn bytes_shown(&self) -> u64 {
        self.shown_bytes.load(Ordering::SeqCst)
    }

    /// Copy of the most recently shown frame.
    pub fn last_frame(&self) -> Vec<u8> {
        self.last_frame.lock().clone()
    }

    /// Failure injection.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

impl StreamSink for MockStreamSink {
    fn set_event_handler(&self, handler: Arc<dyn StreamEvents>) {
        *self.handler.lock() = Some(handler);
    }

    fn show_frame(&self, buf: DmaBuffer, len: usize) -> Result<(), HalError> {
        self.faults.check()?;
        if len > buf.len() {
            return Err(HalError::new(
                "uvc",
                HalErrorKind::InvalidParameter,
                format!("frame length {len} exceeds buffer of {}", buf.len()),
            ));
        }
        // SAFETY: the display side does not touch the buffer while a frame is
        // in flight.
        let bytes = unsafe { buf.as_slice() };
        *self.last_frame.lock() = bytes[..len].to_vec();
        self.shown.fetch_add(1, Ordering::SeqCst);
        self.shown_bytes.fetch_add(len as u64, Ordering::SeqCst);
        debug!(len, "frame queued for transmission");

        if let Some(tx) = &self.releases {
            tx.lock().send(()).map_err(|_| {
                HalError::new("uvc", HalErrorKind::NotReady, "transmit thread gone")
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        active: AtomicBool,
        released: AtomicU64,
    }

    impl StreamEvents for Recorder {
        fn on_streaming_active(&self) {
            self.active.store(true, Ordering::SeqCst);
        }
        fn on_streaming_inactive(&self) {
            self.active.store(false, Ordering::SeqCst);
        }
        fn on_frame_release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn encoder_marks_intra_frames() {
        let enc = MockEncoder::new(16);
        let frame = vec![9u8; 1024];
        let mut out = vec![0u8; 64];

        assert_eq!(enc.encode(&frame, &mut out, true).unwrap(), 16);
        assert_eq!(out[0], INTRA_MARKER);
        assert_eq!(enc.encode(&frame, &mut out, false).unwrap(), 16);
        assert_eq!(out[0], PREDICTED_MARKER);
        assert_eq!((enc.encodes(), enc.intra_frames()), (2, 1));

        enc.set_output_len(0);
        assert_eq!(enc.encode(&frame, &mut out, false).unwrap(), 0);
    }

    #[test]
    fn sink_reports_state_and_releases() {
        let sink = MockStreamSink::new(Some(Duration::from_millis(1))).unwrap();
        let events = Arc::new(Recorder::default());
        sink.set_event_handler(events.clone());

        sink.set_streaming(true);
        assert!(events.active.load(Ordering::SeqCst));

        let buf = DmaBuffer::alloc(32).unwrap();
        unsafe { buf.as_mut_slice()[..3].copy_from_slice(&[1, 2, 3]) };
        sink.show_frame(buf, 3).unwrap();
        assert_eq!(sink.last_frame(), vec![1, 2, 3]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while events.released.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(events.released.load(Ordering::SeqCst), 1);
        assert!(sink.show_frame(buf, 64).is_err());
    }

    #[test]
    fn manual_sink_keeps_frames_in_flight() {
        let sink = MockStreamSink::new(None).unwrap();
        let events = Arc::new(Recorder::default());
        sink.set_event_handler(events.clone());

        sink.show_frame(DmaBuffer::alloc(8).unwrap(), 8).unwrap();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(events.released.load(Ordering::SeqCst), 0);
        sink.release();
        assert_eq!(events.released.load(Ordering::SeqCst), 1);
    }
}
