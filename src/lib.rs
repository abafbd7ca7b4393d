//! # Rust Vision Pipeline
//!
//! Real-time camera → neural network → display/stream pipeline, written for
//! a microcontroller-class SoC and runnable on a host against simulated
//! peripherals.
//!
//! ## Crate Structure
//!
//! The workspace splits the system by concern:
//!
//! - **`vision-hal`**: DMA buffer handles and the peripheral traits.
//! - **`vision-pool`**: the two-slot [`BufferQueue`](vision_pool::BufferQueue)
//!   and its counting semaphore.
//! - **`vision-nn`**: the model registry multiplexing networks over one
//!   accelerator.
//! - **`vision-stats`**: timing statistics and CPU load.
//! - **`vision-driver-mock`**: simulated peripherals.
//!
//! This crate ties them together:
//!
//! - **`pipeline`**: interrupt handlers, capture ring and the three tasks.
//! - **`display`**: overlay layout, compositor access, encode and stream.
//! - **`config`**: Figment-based configuration.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: [`PipelineError`](error::PipelineError) and the fatal
//!   handler.
//! - **`sim`**: a complete simulated board.

pub mod config;
#[allow(unsafe_code)]
pub mod display;
pub mod error;
pub mod logging;
#[allow(unsafe_code)]
pub mod pipeline;
pub mod sim;

pub use config::VisionConfig;
pub use error::{abort_on_fatal, FatalHandler, PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineContext, PipelineHardware};
