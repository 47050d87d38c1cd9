//! Model-free orientation guess from luminance transitions.
//!
//! Upright latin text is dominated by vertical strokes, so binarised pixels
//! change more often along rows than along columns. The heuristic can only
//! tell 0° from 90°.

use image::RgbImage;
use image::imageops::FilterType;

use text_recognizer::{LineOrienter, OrientationResult, Result};

const THUMB_SIZE: u32 = 128;
const TALL_ASPECT: f32 = 1.2;
const WIDE_ASPECT: f32 = 0.8;
const TALL_BONUS: f32 = 0.15;
const WIDE_BONUS: f32 = 0.10;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicOrienter;

impl HeuristicOrienter {
    pub fn new() -> Self {
        Self
    }
}

impl LineOrienter for HeuristicOrienter {
    fn predict(&self, patch: &RgbImage) -> Result<OrientationResult> {
        Ok(classify(patch))
    }
}

/// Transition-count classification; deterministic in its input.
pub fn classify(patch: &RgbImage) -> OrientationResult {
    let (w, h) = patch.dimensions();
    if w == 0 || h == 0 {
        return OrientationResult { angle: 0, confidence: 0.0 };
    }

    let thumb = image::imageops::resize(patch, THUMB_SIZE, THUMB_SIZE, FilterType::Lanczos3);
    let luminance: Vec<f32> = thumb
        .pixels()
        .map(|p| 0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2]))
        .collect();
    let mean = luminance.iter().sum::<f32>() / luminance.len() as f32;
    let binary: Vec<bool> = luminance.iter().map(|&l| l > mean).collect();

    let side = THUMB_SIZE as usize;
    let mut row_transitions = 0u32;
    let mut col_transitions = 0u32;
    for y in 0..side {
        for x in 0..side - 1 {
            if binary[y * side + x] != binary[y * side + x + 1] {
                row_transitions += 1;
            }
        }
    }
    for x in 0..side {
        for y in 0..side - 1 {
            if binary[y * side + x] != binary[(y + 1) * side + x] {
                col_transitions += 1;
            }
        }
    }

    if row_transitions + col_transitions == 0 {
        return OrientationResult { angle: 0, confidence: 0.0 };
    }

    let total = (row_transitions + col_transitions) as f32;
    let aspect = h as f32 / w as f32;
    if col_transitions >= row_transitions {
        let mut confidence = (col_transitions - row_transitions) as f32 / total;
        if aspect > TALL_ASPECT {
            confidence += TALL_BONUS;
        }
        OrientationResult { angle: 90, confidence: confidence.min(1.0) }
    } else {
        let mut confidence = (row_transitions - col_transitions) as f32 / total;
        if aspect < WIDE_ASPECT {
            confidence += WIDE_BONUS;
        }
        OrientationResult { angle: 0, confidence: confidence.min(1.0) }
    }
}
