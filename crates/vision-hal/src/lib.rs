//! Hardware collaborator contracts for the vision pipeline.
//!
//! Every peripheral the pipeline drives is reached through a small trait
//! defined here, so the orchestration code is hardware agnostic and can run
//! against real drivers or the simulated ones in `vision-driver-mock`:
//!
//! - [`Camera`] / [`CameraEvents`]: capture pipes and their interrupts
//! - [`NpuRuntime`] / [`NetworkInstance`]: neural-network accelerator
//! - [`CacheController`]: data-cache maintenance around DMA
//! - [`Blitter`] / [`FontRasterizer`]: 2D compositor and text rendering
//! - [`FrameEncoder`] / [`StreamSink`]: video encode and USB streaming
//! - [`Button`], [`Led`], [`Clock`], [`RunTimeCounters`]: board I/O
//! - [`Postprocessor`]: network output decoding
//!
//! All traits are `Send + Sync` (postprocessors only `Send`, they are owned by
//! a single task) and report failures as [`HalError`].

pub mod blit;
pub mod board;
pub mod cache;
pub mod camera;
#[allow(unsafe_code)]
pub mod dma;
pub mod error;
pub mod npu;
pub mod postprocess;
pub mod stream;

pub use blit::{
    BlendRequest, BlitCompletion, Blitter, FillRequest, FontRasterizer, FontSize, Surface,
    ARGB_BPP,
};
pub use board::{Button, Clock, Led, LedColor, RunTimeCounters};
pub use cache::{align_to_lines, CacheController, CacheMaintenance, CACHE_LINE_SIZE};
pub use camera::{Camera, CameraEvents, CaptureMode, Pipe};
pub use dma::{DmaBuffer, DMA_ALIGN};
pub use error::{HalError, HalErrorKind};
pub use npu::{network_key, BufferInfo, NetworkInstance, NpuRuntime};
pub use postprocess::{Detection, PostprocessKind, Postprocessor};
pub use stream::{FrameEncoder, StreamEvents, StreamSink};
