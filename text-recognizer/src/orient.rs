//! Orientation capability consumed by the engine.
//!
//! The engine only needs single and batched angle predictions; whether they
//! come from a classifier model or a heuristic is the implementor's concern.

use image::RgbImage;

use crate::error::Result;

/// A predicted text-line angle with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationResult {
    /// One of 0, 90, 180, 270 degrees.
    pub angle: u16,
    /// Probability in [0, 1].
    pub confidence: f32,
}

impl OrientationResult {
    pub fn upright(confidence: f32) -> Self {
        Self {
            angle: 0,
            confidence,
        }
    }
}

/// Four-way text-line angle predictor.
pub trait LineOrienter: Send + Sync {
    fn predict(&self, patch: &RgbImage) -> Result<OrientationResult>;

    fn predict_batch(&self, patches: &[RgbImage]) -> Result<Vec<OrientationResult>> {
        patches.iter().map(|p| self.predict(p)).collect()
    }
}
