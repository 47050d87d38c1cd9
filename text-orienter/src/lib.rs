//! Text-line orientation classification.
//!
//! A four-class angle model over {0°, 90°, 180°, 270°}, with a
//! deterministic transition-count heuristic as construction fallback.

pub mod heuristic;

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use image::imageops::FilterType;
use ndarray::Array4;
use tracing::{debug, warn};

use text_recognizer::error::RecognitionError;
use text_recognizer::session::{GpuConfig, ModelSession, SessionOptions, init_runtime};
use text_recognizer::{LineOrienter, OrientationResult, Result, preprocess};

pub use heuristic::HeuristicOrienter;

const ANGLE_CLASSES: [u16; 4] = [0, 90, 180, 270];
const DEFAULT_INPUT_SIZE: u32 = 192;

/// Construction options for [`build_orienter`].
#[derive(Debug, Clone)]
pub struct OrienterConfig {
    pub enabled: bool,
    pub model_path: PathBuf,
    /// Predictions below this probability are treated as upright.
    pub confidence_threshold: f32,
    pub num_threads: usize,
    /// Degrade to the heuristic when the model cannot be initialised.
    pub use_heuristic_fallback: bool,
    /// Skip the model entirely and always use the heuristic.
    pub heuristic_only: bool,
    pub gpu: GpuConfig,
    /// Return 0° immediately for roughly square patches.
    pub skip_square_images: bool,
    pub square_threshold: f32,
    pub warm_up: bool,
}

impl Default for OrienterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::new(),
            confidence_threshold: 0.7,
            num_threads: 0,
            use_heuristic_fallback: true,
            heuristic_only: false,
            gpu: GpuConfig::default(),
            skip_square_images: true,
            square_threshold: 1.2,
            warm_up: false,
        }
    }
}

/// Build an orienter per the configured fallback chain.
pub fn build_orienter(config: &OrienterConfig) -> Result<Arc<dyn LineOrienter>> {
    if config.heuristic_only || !config.enabled {
        return Ok(Arc::new(HeuristicOrienter::new()));
    }
    match ModelOrienter::open(config) {
        Ok(orienter) => Ok(Arc::new(orienter)),
        Err(err) if config.use_heuristic_fallback => {
            warn!(error = %err, "orientation model unavailable, using heuristic");
            Ok(Arc::new(HeuristicOrienter::new()))
        }
        Err(err) => Err(err),
    }
}

/// Model-backed four-way angle classifier.
pub struct ModelOrienter {
    session: ModelSession,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    skip_square_images: bool,
    square_threshold: f32,
}

impl ModelOrienter {
    pub fn open(config: &OrienterConfig) -> Result<Self> {
        init_runtime(config.gpu.enabled)?;
        let session_options = SessionOptions {
            num_threads: config.num_threads,
            gpu: config.gpu.clone(),
            ..SessionOptions::default()
        };
        let session = ModelSession::open(&config.model_path, &session_options)?;

        // Fixed spatial dims are adopted; dynamic models get the default
        // square input.
        let input_height = session.input_height().unwrap_or(DEFAULT_INPUT_SIZE);
        let input_width = session.input_width().unwrap_or(DEFAULT_INPUT_SIZE);
        debug!(input_width, input_height, "orientation model open");

        let orienter = Self {
            session,
            input_width,
            input_height,
            confidence_threshold: config.confidence_threshold,
            skip_square_images: config.skip_square_images,
            square_threshold: config.square_threshold,
        };
        if config.warm_up {
            orienter.warmup()?;
        }
        Ok(orienter)
    }

    /// One blank inference to settle kernels before first use.
    pub fn warmup(&self) -> Result<()> {
        let input = Array4::<f32>::zeros((
            1,
            3,
            self.input_height as usize,
            self.input_width as usize,
        ));
        self.session.run(&input)?;
        Ok(())
    }

    pub fn close(&self) {
        self.session.close();
    }

    fn skips(&self, patch: &RgbImage) -> bool {
        if !self.skip_square_images {
            return false;
        }
        let (w, h) = patch.dimensions();
        if w == 0 || h == 0 {
            return false;
        }
        let ratio = w.max(h) as f32 / w.min(h) as f32;
        ratio <= self.square_threshold
    }

    fn normalized_input(&self, patch: &RgbImage) -> Result<Vec<f32>> {
        let resized = image::imageops::resize(
            patch,
            self.input_width,
            self.input_height,
            FilterType::Lanczos3,
        );
        let mut buf = vec![0.0f32; 3 * (self.input_width * self.input_height) as usize];
        preprocess::normalize_into(&resized, &mut buf)?;
        Ok(buf)
    }

    fn decode_row(&self, row: &[f32]) -> Result<OrientationResult> {
        if row.len() < ANGLE_CLASSES.len() {
            return Err(RecognitionError::Decode(format!(
                "orientation model produced {} classes, need {}",
                row.len(),
                ANGLE_CLASSES.len()
            )));
        }
        let scores = softmax4(&row[..ANGLE_CLASSES.len()]);
        let (best, &probability) = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .expect("four scores");

        if probability >= self.confidence_threshold {
            Ok(OrientationResult {
                angle: ANGLE_CLASSES[best],
                confidence: probability,
            })
        } else {
            // Not confident enough to rotate; report the probability so the
            // caller can see how close the call was.
            Ok(OrientationResult {
                angle: 0,
                confidence: probability,
            })
        }
    }
}

impl LineOrienter for ModelOrienter {
    fn predict(&self, patch: &RgbImage) -> Result<OrientationResult> {
        if patch.width() == 0 || patch.height() == 0 {
            return Err(RecognitionError::Preprocessing("empty patch".into()));
        }
        if self.skips(patch) {
            return Ok(OrientationResult { angle: 0, confidence: 1.0 });
        }

        let buf = self.normalized_input(patch)?;
        let input = Array4::from_shape_vec(
            (1, 3, self.input_height as usize, self.input_width as usize),
            buf,
        )
        .map_err(|e| RecognitionError::Preprocessing(format!("input reshape: {e}")))?;
        let output = self.session.run(&input)?;
        self.decode_row(row_of(&output, 0)?)
    }

    fn predict_batch(&self, patches: &[RgbImage]) -> Result<Vec<OrientationResult>> {
        if patches.is_empty() {
            return Ok(Vec::new());
        }

        // Square patches short-circuit; the rest share one model call.
        let mut results = vec![OrientationResult { angle: 0, confidence: 1.0 }; patches.len()];
        let mut pending = Vec::new();
        for (i, patch) in patches.iter().enumerate() {
            if patch.width() == 0 || patch.height() == 0 {
                return Err(RecognitionError::Preprocessing(format!(
                    "empty patch at index {i}"
                )));
            }
            if !self.skips(patch) {
                pending.push(i);
            }
        }
        if pending.is_empty() {
            return Ok(results);
        }

        let plane = (self.input_width * self.input_height) as usize;
        let mut data = Vec::with_capacity(pending.len() * 3 * plane);
        for &i in &pending {
            data.extend(self.normalized_input(&patches[i])?);
        }
        let input = Array4::from_shape_vec(
            (
                pending.len(),
                3,
                self.input_height as usize,
                self.input_width as usize,
            ),
            data,
        )
        .map_err(|e| RecognitionError::Preprocessing(format!("batch reshape: {e}")))?;

        let output = self.session.run(&input)?;
        for (row, &patch_index) in pending.iter().enumerate() {
            results[patch_index] = self.decode_row(row_of(&output, row)?)?;
        }
        Ok(results)
    }
}

/// Slice one batch row out of a `[N, C]`-shaped output.
fn row_of(output: &text_recognizer::tensor::Tensor, row: usize) -> Result<&[f32]> {
    let shape = output.shape();
    let row_len: usize = shape.iter().skip(1).product();
    let start = row * row_len;
    let end = start + row_len;
    if row_len == 0 || end > output.data().len() {
        return Err(RecognitionError::Decode(format!(
            "orientation output shape {shape:?} has no row {row}"
        )));
    }
    Ok(&output.data()[start..end])
}

fn softmax4(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    if sum == 0.0 {
        return vec![0.0; scores.len()];
    }
    exp.into_iter().map(|v| v / sum).collect()
}
