//! Decoding raw network output into detections.

use crate::error::HalError;
use serde::{Deserialize, Serialize};

/// Which decoder a model's output needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostprocessKind {
    /// Grid/anchor based single-shot detector.
    YoloV2,
    /// Anchor-free single-shot detector.
    YoloV8,
    /// Center-point detector.
    CenterNet,
    /// Application-defined decoder tag.
    Custom(u32),
}

/// One detected object, coordinates normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box center, horizontal.
    pub x_center: f32,
    /// Box center, vertical.
    pub y_center: f32,
    /// Box width.
    pub width: f32,
    /// Box height.
    pub height: f32,
    /// Score in `[0, 1]`.
    pub confidence: f32,
    /// Class index.
    pub class_index: u32,
}

/// Decoder for one model's output tensor.
pub trait Postprocessor: Send {
    /// Decoder family.
    fn kind(&self) -> PostprocessKind;

    /// Decodes `output` into detections.
    fn run(&mut self, output: &[u8]) -> Result<Vec<Detection>, HalError>;
}
