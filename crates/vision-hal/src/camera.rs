//! Camera sensor and ISP front end.

use crate::dma::DmaBuffer;
use crate::error::HalError;
use std::sync::Arc;

/// One independently addressable camera output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipe {
    /// Full-resolution display stream.
    Main,
    /// Downscaled stream feeding the neural network.
    Ancillary,
}

impl Pipe {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Ancillary => "ancillary",
        }
    }
}

/// How a pipe keeps capturing after its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Capture frames back to back until stopped.
    #[default]
    Continuous,
    /// Capture a single frame.
    Snapshot,
}

/// Interrupt-context notifications raised by the camera driver.
///
/// Implementations run on the driver's interrupt path and must never block.
pub trait CameraEvents: Send + Sync {
    /// A frame finished landing in the current destination of `pipe`.
    fn on_frame_event(&self, pipe: Pipe);

    /// Vertical sync for `pipe`.
    fn on_vsync_event(&self, pipe: Pipe);
}

/// Camera pipeline driver.
pub trait Camera: Send + Sync {
    /// Installs the interrupt callback target. Must be called before `start`.
    fn set_event_handler(&self, handler: Arc<dyn CameraEvents>);

    /// Starts capturing `pipe` into `dst`.
    fn start(&self, pipe: Pipe, dst: DmaBuffer, mode: CaptureMode) -> Result<(), HalError>;

    /// Repoints the destination of `pipe`; takes effect from the next frame.
    fn update_address(&self, pipe: Pipe, dst: DmaBuffer) -> Result<(), HalError>;

    /// Refreshes ISP statistics and control loops (exposure, white balance).
    fn isp_update(&self) -> Result<(), HalError>;
}
