//! Recognition engine: crop → orient → resize → normalise → infer → decode.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use serde::Serialize;
use tracing::{debug, info};

use crate::charset::{Charset, FilterCharset};
use crate::ctc;
use crate::error::{RecognitionError, Result};
use crate::orient::{LineOrienter, OrientationResult};
use crate::pool::scratch_pool;
use crate::postprocess::{self, PostProcessOptions};
use crate::preprocess;
use crate::region::DetectedRegion;
use crate::session::{GpuConfig, ModelSession, SessionOptions};
use crate::tensor::Tensor;

pub const DEFAULT_IMAGE_HEIGHT: u32 = 48;
pub const DEFAULT_PAD_MULTIPLE: u32 = 8;
pub const DEFAULT_BEAM_WIDTH: usize = 10;

const MOBILE_MODEL_FILE: &str = "models/rec_mobile.onnx";
const SERVER_MODEL_FILE: &str = "models/rec_server.onnx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodingMethod {
    #[default]
    Greedy,
    BeamSearch,
}

impl FromStr for DecodingMethod {
    type Err = RecognitionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "beam_search" => Ok(Self::BeamSearch),
            other => Err(RecognitionError::Configuration(format!(
                "unknown decoding method {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for DecodingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Greedy => write!(f, "greedy"),
            Self::BeamSearch => write!(f, "beam_search"),
        }
    }
}

/// Engine configuration; see the crate docs for the field semantics.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Recognition model; empty selects a default file, heavier when
    /// `server_model` is set.
    pub model_path: PathBuf,
    pub dict_paths: Vec<PathBuf>,
    pub filter_dict_paths: Vec<PathBuf>,
    /// Model input height; 0 adopts the model's fixed height.
    pub image_height: u32,
    pub server_model: bool,
    pub num_threads: usize,
    /// Clamp for resized patch width; 0 leaves it unbounded.
    pub max_width: u32,
    pub pad_width_multiple: u32,
    /// Post-process replacement map selector; empty skips post-processing.
    pub language: String,
    pub decoding_method: DecodingMethod,
    pub beam_width: usize,
    /// Rotate clearly vertical patches even without a classifier.
    pub rotate_if_vertical: bool,
    pub gpu: GpuConfig,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            dict_paths: Vec::new(),
            filter_dict_paths: Vec::new(),
            image_height: DEFAULT_IMAGE_HEIGHT,
            server_model: false,
            num_threads: 0,
            max_width: 0,
            pad_width_multiple: DEFAULT_PAD_MULTIPLE,
            language: String::new(),
            decoding_method: DecodingMethod::Greedy,
            beam_width: DEFAULT_BEAM_WIDTH,
            rotate_if_vertical: true,
            gpu: GpuConfig::default(),
        }
    }
}

impl RecognizerConfig {
    pub fn resolved_model_path(&self) -> PathBuf {
        if !self.model_path.as_os_str().is_empty() {
            return self.model_path.clone();
        }
        PathBuf::from(if self.server_model {
            SERVER_MODEL_FILE
        } else {
            MOBILE_MODEL_FILE
        })
    }

    fn validate(&self) -> Result<()> {
        if self.dict_paths.is_empty() {
            return Err(RecognitionError::Configuration(
                "at least one dictionary path is required".into(),
            ));
        }
        if self.decoding_method == DecodingMethod::BeamSearch && self.beam_width == 0 {
            return Err(RecognitionError::Configuration(
                "beam width must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Wall-clock nanoseconds per recognition stage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
    pub preprocess_ns: u64,
    pub model_ns: u64,
    pub decode_ns: u64,
    pub total_ns: u64,
}

/// Decoded text for one region.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Mean of the per-character probabilities; 0 for empty text.
    pub confidence: f32,
    pub char_probs: Vec<f32>,
    /// Collapsed class indices kept after token lookup.
    pub indices: Vec<usize>,
    /// Whether the patch was rotated before inference.
    pub rotated: bool,
    /// Padded width fed to the model.
    pub width: u32,
    pub height: u32,
    pub timings: StageTimings,
}

struct EngineInner {
    session: ModelSession,
    charset: Charset,
    filter: Option<FilterCharset>,
    orienter: Option<Arc<dyn LineOrienter>>,
    post_process: Option<PostProcessOptions>,
    image_height: u32,
    config: RecognizerConfig,
}

/// Thread-safe text-line recognizer.
///
/// `recognize_*` calls and getters share the read side of the lock and may
/// run concurrently; `close` and `set_textline_orienter` take the write
/// side.
pub struct Recognizer {
    inner: RwLock<EngineInner>,
}

impl Recognizer {
    pub fn new(config: RecognizerConfig) -> Result<Self> {
        config.validate()?;
        crate::session::init_runtime(config.gpu.enabled)?;

        let charset = Charset::from_files(&config.dict_paths)?;
        let filter = if config.filter_dict_paths.is_empty() {
            None
        } else {
            Some(FilterCharset::from_files(&config.filter_dict_paths)?)
        };

        let session_options = SessionOptions {
            num_threads: config.num_threads,
            gpu: config.gpu.clone(),
            ..SessionOptions::default()
        };
        let session = ModelSession::open(&config.resolved_model_path(), &session_options)?;
        let output_rank = session.info().output_shape.len();
        if output_rank < 3 {
            return Err(RecognitionError::ModelShape(format!(
                "recognition model output must be rank 3 or higher, got rank {output_rank}"
            )));
        }

        let image_height = if config.image_height > 0 {
            config.image_height
        } else {
            session.input_height().unwrap_or(DEFAULT_IMAGE_HEIGHT)
        };
        let post_process = if config.language.is_empty() {
            None
        } else {
            Some(PostProcessOptions::for_language(&config.language))
        };

        info!(
            model = %config.resolved_model_path().display(),
            charset = charset.len(),
            image_height,
            method = %config.decoding_method,
            "recognizer ready"
        );

        Ok(Self {
            inner: RwLock::new(EngineInner {
                session,
                charset,
                filter,
                orienter: None,
                post_process,
                image_height,
                config,
            }),
        })
    }

    /// Install or remove the text-line orientation classifier.
    pub fn set_textline_orienter(&self, orienter: Option<Arc<dyn LineOrienter>>) {
        let mut inner = self.inner.write().expect("engine lock poisoned");
        inner.orienter = orienter;
    }

    /// Release the runtime session. Safe to call more than once.
    pub fn close(&self) {
        let inner = self.inner.write().expect("engine lock poisoned");
        inner.session.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().expect("engine lock poisoned").session.is_closed()
    }

    pub fn image_height(&self) -> u32 {
        self.inner.read().expect("engine lock poisoned").image_height
    }

    pub fn charset_len(&self) -> usize {
        self.inner.read().expect("engine lock poisoned").charset.len()
    }

    /// Recognize a single detected region.
    pub fn recognize_region(
        &self,
        image: &DynamicImage,
        region: &DetectedRegion,
    ) -> Result<RecognitionResult> {
        let inner = self.inner.read().expect("engine lock poisoned");
        let total = Instant::now();

        // Preprocess.
        let stage = Instant::now();
        let patch = preprocess::crop_region(image, region)?;
        let classification = match inner.orienter.as_deref() {
            Some(orienter) => Some(orienter.predict(&patch)?),
            None => None,
        };
        let (patch, rotated) =
            preprocess::orient_patch(patch, classification, inner.config.rotate_if_vertical);
        let (padded, _) = preprocess::resize_with_pad(
            &patch,
            inner.image_height,
            inner.config.max_width,
            inner.config.pad_width_multiple,
        )?;
        let (out_w, out_h) = padded.dimensions();
        let buf = preprocess::normalize_pooled(&padded, scratch_pool())?;
        let input = Array4::from_shape_vec((1, 3, out_h as usize, out_w as usize), buf)
            .map_err(|e| RecognitionError::Preprocessing(format!("input reshape: {e}")))?;
        let preprocess_ns = stage.elapsed().as_nanos() as u64;

        // Inference; the pooled buffer goes back as soon as the runtime
        // has produced the output copy.
        let stage = Instant::now();
        let run_result = inner.session.run(&input);
        let (buf, _) = input.into_raw_vec_and_offset();
        scratch_pool().put(buf);
        let output = run_result?;
        let model_ns = stage.elapsed().as_nanos() as u64;

        // Decode.
        let stage = Instant::now();
        let (indices, probs) = decode_rows(&output, &inner, 1)?.remove(0);
        let mut result = assemble_result(&inner, indices, probs);
        let decode_ns = stage.elapsed().as_nanos() as u64;

        result.rotated = rotated;
        result.width = out_w;
        result.height = out_h;
        result.timings = StageTimings {
            preprocess_ns,
            model_ns,
            decode_ns,
            total_ns: total.elapsed().as_nanos() as u64,
        };
        Ok(result)
    }

    /// Recognize many regions of one image in a single model call.
    ///
    /// Results come back in request order. A preprocessing or inference
    /// failure fails the whole batch.
    pub fn recognize_batch(
        &self,
        image: &DynamicImage,
        regions: &[DetectedRegion],
    ) -> Result<Vec<RecognitionResult>> {
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().expect("engine lock poisoned");
        let total = Instant::now();

        // Preprocess all regions, keeping per-region rotation flags.
        let stage = Instant::now();
        let crops: Vec<RgbImage> = regions
            .iter()
            .map(|region| preprocess::crop_region(image, region))
            .collect::<Result<_>>()?;
        let classifications: Vec<Option<OrientationResult>> = match inner.orienter.as_deref() {
            Some(orienter) => orienter.predict_batch(&crops)?.into_iter().map(Some).collect(),
            None => vec![None; crops.len()],
        };

        let mut rotated_flags = Vec::with_capacity(crops.len());
        let mut resized = Vec::with_capacity(crops.len());
        for (patch, classification) in crops.into_iter().zip(classifications) {
            let (patch, rotated) = preprocess::orient_patch(
                patch,
                classification,
                inner.config.rotate_if_vertical,
            );
            let patch = preprocess::resize_to_height(
                &patch,
                inner.image_height,
                preprocess::effective_max_width(
                    inner.config.max_width,
                    inner.config.pad_width_multiple,
                ),
            )?;
            rotated_flags.push(rotated);
            resized.push(patch);
        }

        let batch_width = resized
            .iter()
            .map(|p| preprocess::padded_width(p.width(), inner.config.pad_width_multiple))
            .max()
            .unwrap_or(inner.image_height * 4);

        let mut buffers = Vec::with_capacity(resized.len());
        for patch in &resized {
            let padded = preprocess::pad_right(patch, batch_width);
            buffers.push(preprocess::normalize_pooled(&padded, scratch_pool())?);
        }
        let stacked = Tensor::batch(
            &buffers,
            3,
            inner.image_height as usize,
            batch_width as usize,
        )?;
        for buf in buffers {
            scratch_pool().put(buf);
        }
        let input = stacked.to_array4()?;
        let preprocess_ns = stage.elapsed().as_nanos() as u64;

        // One inference for the whole batch.
        let stage = Instant::now();
        let output = inner.session.run(&input)?;
        let model_ns = stage.elapsed().as_nanos() as u64;

        // Decode each row independently.
        let stage = Instant::now();
        let decoded = decode_rows(&output, &inner, regions.len())?;
        let decode_ns = stage.elapsed().as_nanos() as u64;
        let timings = StageTimings {
            preprocess_ns,
            model_ns,
            decode_ns,
            total_ns: total.elapsed().as_nanos() as u64,
        };

        let mut results = Vec::with_capacity(regions.len());
        for (i, rotated) in rotated_flags.iter().enumerate() {
            // A runtime returning fewer rows than requested still yields a
            // full-length result list.
            let mut result = match decoded.get(i) {
                Some((indices, probs)) => {
                    assemble_result(&inner, indices.clone(), probs.clone())
                }
                None => RecognitionResult::default(),
            };
            result.rotated = *rotated;
            result.width = batch_width;
            result.height = inner.image_height;
            result.timings = timings;
            results.push(result);
        }
        Ok(results)
    }

    /// Run `count` inferences on a blank patch to warm kernels and arenas.
    pub fn warmup(&self, count: usize) -> Result<()> {
        let inner = self.inner.read().expect("engine lock poisoned");
        let height = inner.image_height;
        let width = preprocess::padded_width(height * 4, inner.config.pad_width_multiple);
        let input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for i in 0..count {
            inner.session.run(&input)?;
            debug!(iteration = i + 1, "warmup inference done");
        }
        Ok(())
    }

    /// Diagnostic map: paths, tensor names and shapes, decode settings.
    pub fn model_info(&self) -> BTreeMap<String, serde_json::Value> {
        let inner = self.inner.read().expect("engine lock poisoned");
        let session = inner.session.info();
        let mut map = BTreeMap::new();
        map.insert("model_path".into(), session.model_path.clone().into());
        map.insert("input_name".into(), session.input_name.clone().into());
        map.insert("output_name".into(), session.output_name.clone().into());
        map.insert("input_shape".into(), session.input_shape.clone().into());
        map.insert("output_shape".into(), session.output_shape.clone().into());
        map.insert("data_type".into(), "float32".into());
        map.insert("image_height".into(), inner.image_height.into());
        map.insert("charset_size".into(), inner.charset.len().into());
        map.insert(
            "decoding_method".into(),
            inner.config.decoding_method.to_string().into(),
        );
        map.insert("beam_width".into(), inner.config.beam_width.into());
        map.insert("accelerator".into(), inner.config.gpu.summary().into());
        map
    }
}

/// Decode every batch row into (collapsed indices, probabilities).
fn decode_rows(
    output: &Tensor,
    inner: &EngineInner,
    expected_rows: usize,
) -> Result<Vec<(Vec<usize>, Vec<f32>)>> {
    let layout = ctc::resolve_layout(output.shape(), inner.charset.len(), false)?;
    if layout.batch > expected_rows {
        debug!(
            got = layout.batch,
            expected = expected_rows,
            "model returned more rows than requested"
        );
    }
    match inner.config.decoding_method {
        DecodingMethod::Greedy => Ok(ctc::greedy_decode(output.data(), &layout)?
            .into_iter()
            .map(|d| (d.collapsed, d.collapsed_probs))
            .collect()),
        DecodingMethod::BeamSearch => Ok(ctc::beam_search_decode(
            output.data(),
            &layout,
            inner.config.beam_width,
        )?
        .into_iter()
        .map(|b| (b.sequence, b.char_probs))
        .collect()),
    }
}

fn assemble_result(
    inner: &EngineInner,
    indices: Vec<usize>,
    probs: Vec<f32>,
) -> RecognitionResult {
    let (mut text, kept_indices, kept_probs) =
        map_tokens(&inner.charset, &indices, &probs);
    if let Some(filter) = &inner.filter {
        text = filter.filter(&text);
    }
    if let Some(options) = &inner.post_process {
        text = postprocess::post_process(&text, options);
    }
    let confidence = ctc::sequence_confidence(&kept_probs);
    RecognitionResult {
        text,
        confidence,
        char_probs: kept_probs,
        indices: kept_indices,
        ..RecognitionResult::default()
    }
}

/// Map collapsed class indices to charset tokens.
///
/// The model's class 0 is the blank, so the charset lookup shifts by one;
/// this is the only place that offset exists. Indices whose lookup is
/// missing or empty are dropped, probabilities stay aligned.
fn map_tokens(
    charset: &Charset,
    indices: &[usize],
    probs: &[f32],
) -> (String, Vec<usize>, Vec<f32>) {
    let mut text = String::new();
    let mut kept = Vec::with_capacity(indices.len());
    let mut kept_probs = Vec::with_capacity(indices.len());
    for (i, &class) in indices.iter().enumerate() {
        if class == 0 {
            continue;
        }
        match charset.token_of(class - 1) {
            Some(token) if !token.is_empty() => {
                text.push_str(token);
                kept.push(class);
                kept_probs.push(probs.get(i).copied().unwrap_or(0.0));
            }
            _ => {}
        }
    }
    (text, kept, kept_probs)
}
