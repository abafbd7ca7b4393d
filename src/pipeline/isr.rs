//! Camera interrupt handlers.
//!
//! Runs on the camera driver's interrupt path: nothing here blocks or
//! allocates. The ancillary handler reaches the input queue's producer
//! through `try_lock` and drops the frame if the lock is held.

use super::PipelineContext;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::trace;
use vision_hal::{CameraEvents, Pipe};

/// Routes camera events into the pipeline.
pub struct CameraIsr {
    ctx: Arc<PipelineContext>,
}

impl CameraIsr {
    /// Handler bound to `ctx`.
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Main pipe finished a frame: rotate the capture ring and point the
    /// camera at the new capture slot.
    fn main_frame(&self) {
        let next = self.ctx.capture.advance();
        if let Err(e) = self.ctx.camera.update_address(Pipe::Main, next) {
            self.ctx.fatal(e.into());
        }
    }

    /// Ancillary pipe finished a frame: if a free input buffer exists, point
    /// the camera at it and publish the completed one.
    fn ancillary_frame(&self) {
        let Some(mut input) = self.ctx.nn_input.try_lock() else {
            self.drop_frame("input producer busy");
            return;
        };
        let Some(next) = input.try_acquire_free() else {
            self.drop_frame("no free input buffer");
            return;
        };
        if let Err(e) = self.ctx.camera.update_address(Pipe::Ancillary, next) {
            self.ctx.fatal(e.into());
            return;
        }
        if let Err(e) = input.publish_ready() {
            self.ctx.fatal(e.into());
        }
    }

    fn drop_frame(&self, reason: &'static str) {
        let dropped = self.ctx.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(reason, dropped, "ancillary frame dropped");
    }

    /// Main pipe vsync: wake the ISP task. Vsyncs arriving while a wake is
    /// already pending collapse into it.
    fn main_vsync(&self) {
        if !self.ctx.isp_wake.give() {
            self.ctx.collapsed_vsyncs.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl CameraEvents for CameraIsr {
    fn on_frame_event(&self, pipe: Pipe) {
        match pipe {
            Pipe::Main => self.main_frame(),
            Pipe::Ancillary => self.ancillary_frame(),
        }
    }

    fn on_vsync_event(&self, pipe: Pipe) {
        if pipe == Pipe::Main {
            self.main_vsync();
        }
    }
}
