//! Video encoder and USB video streaming sink.

use crate::dma::DmaBuffer;
use crate::error::HalError;
use std::sync::Arc;

/// Hardware video encoder.
pub trait FrameEncoder: Send + Sync {
    /// Encodes `frame` into `out` and returns the encoded length. Zero means
    /// the encoder produced nothing for this frame.
    fn encode(&self, frame: &[u8], out: &mut [u8], force_intra: bool) -> Result<usize, HalError>;
}

/// Notifications from the streaming stack, raised from its own context.
pub trait StreamEvents: Send + Sync {
    /// A host opened the video stream.
    fn on_streaming_active(&self);

    /// The host closed the video stream.
    fn on_streaming_inactive(&self);

    /// The frame passed to the last `show_frame` has been transmitted.
    fn on_frame_release(&self);
}

/// USB video class sink.
pub trait StreamSink: Send + Sync {
    /// Installs the notification target.
    fn set_event_handler(&self, handler: Arc<dyn StreamEvents>);

    /// Queues `buf[..len]` for transmission. The buffer stays owned by the
    /// sink until `on_frame_release`.
    fn show_frame(&self, buf: DmaBuffer, len: usize) -> Result<(), HalError>;
}
