//! Simulated peripherals for running the vision pipeline on a host.
//!
//! Every collaborator trait of `vision-hal` has a stand-in here, so the whole
//! pipeline (interrupt routing, task topology, buffer handoff) can be run and
//! tested without a board.
//!
//! # Available Mock Drivers
//!
//! - [`MockCamera`] - dual-pipe camera, free running or manually driven
//! - [`MockNpuRuntime`] / [`MockNetwork`] - accelerator faking inference with
//!   synthetic detections, decoded by [`MockPostprocessor`]
//! - [`MockCache`] - records maintenance requests
//! - [`MockBlitter`] / [`MockRasterizer`] - software compositor with
//!   completion raised from its own "IRQ" thread
//! - [`MockEncoder`] / [`MockStreamSink`] - encoder and USB video sink
//! - [`MockButton`], [`MockLed`], [`SystemClock`], [`ManualClock`],
//!   [`MockRunTimeCounters`] - board I/O
//!
//! # Failure injection
//!
//! Drivers whose failures the pipeline must route to its fatal handler expose
//! a [`FaultInjector`] (`update_faults()`, `faults()`, ...), which fails every
//! call or every call after the next `n`.

#[allow(unsafe_code)]
mod blit;
mod board;
mod cache;
#[allow(unsafe_code)]
mod camera;
mod fault;
#[allow(unsafe_code)]
mod npu;
mod pattern;
mod rng;
#[allow(unsafe_code)]
mod stream;

pub use blit::{MockBlitter, MockRasterizer};
pub use board::{ManualClock, MockButton, MockLed, MockRunTimeCounters, SystemClock};
pub use cache::{CacheOp, CacheOpKind, MockCache};
pub use camera::MockCamera;
pub use fault::FaultInjector;
pub use npu::{
    decode_detections, detection_tensor_len, encode_detections, MockNetwork, MockNpuRuntime,
    MockPostprocessor,
};
pub use pattern::{fill_test_pattern, frame_tag};
pub use rng::MockRng;
pub use stream::{MockEncoder, MockStreamSink, INTRA_MARKER, PREDICTED_MARKER};
