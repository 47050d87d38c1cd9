//! Lifecycle of an ONNX Runtime session for a single float model.
//!
//! The runtime library itself is loaded dynamically: a short list of
//! well-known install locations is probed, then the project-relative
//! layout, GPU builds first when requested.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use ndarray::Array4;
use ort::execution_providers::cuda::CuDNNConvAlgorithmSearch;
use ort::execution_providers::{ArenaExtendStrategy, CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::tensor::TensorElementType;
use ort::value::{TensorRef, ValueType};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{RecognitionError, Result};
use crate::tensor::Tensor;

/// Accelerator arena growth policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ArenaExtendPolicy {
    #[default]
    NextPowerOfTwo,
    SameAsRequested,
}

/// Kernel selection policy for the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum KernelSearchPolicy {
    #[default]
    Default,
    Heuristic,
    Exhaustive,
}

/// Accelerator configuration shared by every model session.
#[derive(Debug, Clone, Serialize)]
pub struct GpuConfig {
    pub enabled: bool,
    pub device_id: i32,
    /// Memory cap in bytes; 0 leaves the arena unlimited.
    pub mem_limit: usize,
    pub arena_extend_strategy: ArenaExtendPolicy,
    pub kernel_search: KernelSearchPolicy,
    pub copy_in_default_stream: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: 0,
            mem_limit: 0,
            arena_extend_strategy: ArenaExtendPolicy::default(),
            kernel_search: KernelSearchPolicy::default(),
            copy_in_default_stream: true,
        }
    }
}

impl GpuConfig {
    pub fn summary(&self) -> String {
        if self.enabled {
            format!("cuda(device={}, mem_limit={})", self.device_id, self.mem_limit)
        } else {
            "cpu".to_string()
        }
    }
}

/// Options for [`ModelSession::open`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Input tensor name; defaults to the model's declared name.
    pub input_name: Option<String>,
    /// Output tensor name; defaults to the model's declared name.
    pub output_name: Option<String>,
    /// Runtime intra-op thread count; 0 lets the runtime decide.
    pub num_threads: usize,
    pub gpu: GpuConfig,
}

/// Diagnostic view of an open session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub model_path: String,
    pub input_name: String,
    pub output_name: String,
    pub input_shape: Vec<i64>,
    pub output_shape: Vec<i64>,
}

const LINUX_SYSTEM_PATHS: [&str; 3] = [
    "/usr/local/lib/libonnxruntime.so",
    "/usr/lib/libonnxruntime.so",
    "/opt/onnxruntime/cpu/lib/libonnxruntime.so",
];
const LINUX_GPU_PATH: &str = "/opt/onnxruntime/gpu/lib/libonnxruntime.so";

fn runtime_library_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "libonnxruntime.dylib"
    } else if cfg!(target_os = "windows") {
        "onnxruntime.dll"
    } else {
        "libonnxruntime.so"
    }
}

/// Candidate locations for the runtime library, in probe order.
pub fn runtime_library_candidates(gpu: bool) -> Vec<PathBuf> {
    let name = runtime_library_name();
    let mut candidates = Vec::new();

    if gpu {
        if cfg!(target_os = "linux") {
            candidates.push(PathBuf::from(LINUX_GPU_PATH));
        }
        candidates.push(PathBuf::from("onnxruntime/gpu/lib").join(name));
    }
    if cfg!(target_os = "linux") {
        candidates.extend(LINUX_SYSTEM_PATHS.iter().map(PathBuf::from));
    } else if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from("/usr/local/lib").join(name));
        candidates.push(PathBuf::from("/opt/homebrew/lib").join(name));
    }
    candidates.push(PathBuf::from("onnxruntime/lib").join(name));
    candidates
}

/// Find the runtime library on disk.
pub fn discover_runtime_library(gpu: bool) -> Option<PathBuf> {
    runtime_library_candidates(gpu).into_iter().find(|p| p.exists())
}

/// Load the runtime library once per process.
///
/// Every session in the process shares the environment, so the first call
/// decides between the CPU and GPU library layout.
pub fn init_runtime(gpu: bool) -> Result<()> {
    static RUNTIME: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    let outcome = RUNTIME.get_or_init(|| {
        let path = discover_runtime_library(gpu)
            .ok_or_else(|| "onnxruntime library not found in any known location".to_string())?;
        info!(path = %path.display(), "loading onnxruntime");
        ort::init_from(path.to_string_lossy())
            .commit()
            .map_err(|e| format!("onnxruntime load failed: {e}"))?;
        Ok(())
    });
    outcome
        .clone()
        .map_err(RecognitionError::RuntimeInit)
}

fn execution_providers(gpu: &GpuConfig) -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    if gpu.enabled {
        let mut cuda = CUDAExecutionProvider::default()
            .with_device_id(gpu.device_id)
            .with_arena_extend_strategy(match gpu.arena_extend_strategy {
                ArenaExtendPolicy::NextPowerOfTwo => ArenaExtendStrategy::NextPowerOfTwo,
                ArenaExtendPolicy::SameAsRequested => ArenaExtendStrategy::SameAsRequested,
            })
            .with_conv_algorithm_search(match gpu.kernel_search {
                KernelSearchPolicy::Default => CuDNNConvAlgorithmSearch::Default,
                KernelSearchPolicy::Heuristic => CuDNNConvAlgorithmSearch::Heuristic,
                KernelSearchPolicy::Exhaustive => CuDNNConvAlgorithmSearch::Exhaustive,
            })
            .with_copy_in_default_stream(gpu.copy_in_default_stream);
        if gpu.mem_limit > 0 {
            cuda = cuda.with_memory_limit(gpu.mem_limit);
        }
        providers.push(cuda.build());
    }
    providers.push(CPUExecutionProvider::default().build());
    providers
}

/// An open single-input, single-output float model.
pub struct ModelSession {
    session: Mutex<Option<Session>>,
    path: PathBuf,
    input_name: String,
    output_name: String,
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
}

impl ModelSession {
    /// Load and validate a model from disk.
    pub fn open(path: &Path, options: &SessionOptions) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(RecognitionError::Configuration("empty model path".into()));
        }
        if !path.exists() {
            return Err(RecognitionError::missing_file(&path.to_path_buf()));
        }

        let mut builder = Session::builder()
            .map_err(|e| RecognitionError::RuntimeInit(format!("session options: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RecognitionError::RuntimeInit(format!("session options: {e}")))?
            .with_execution_providers(execution_providers(&options.gpu))
            .map_err(|e| {
                RecognitionError::RuntimeInit(format!("execution provider setup: {e}"))
            })?;
        if options.num_threads > 0 {
            builder = builder
                .with_intra_threads(options.num_threads)
                .map_err(|e| RecognitionError::RuntimeInit(format!("session options: {e}")))?;
        }
        let session = builder.commit_from_file(path).map_err(|e| {
            RecognitionError::RuntimeInit(format!("cannot load {}: {e}", path.display()))
        })?;

        let (input_name, input_shape) = validate_single_input(&session)?;
        let (output_name, output_shape) = validate_single_output(&session)?;
        debug!(
            model = %path.display(),
            input = %input_name,
            ?input_shape,
            output = %output_name,
            ?output_shape,
            "model session open"
        );

        Ok(Self {
            session: Mutex::new(Some(session)),
            path: path.to_path_buf(),
            input_name: options.input_name.clone().unwrap_or(input_name),
            output_name: options.output_name.clone().unwrap_or(output_name),
            input_shape,
            output_shape,
        })
    }

    /// Fixed input height, when the model declares one.
    pub fn input_height(&self) -> Option<u32> {
        fixed_dim(&self.input_shape, 2)
    }

    /// Fixed input width, when the model declares one.
    pub fn input_width(&self) -> Option<u32> {
        fixed_dim(&self.input_shape, 3)
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Run one inference. The input buffer stays borrowed for the duration
    /// of the call; the output is copied into an owned tensor.
    pub fn run(&self, input: &Array4<f32>) -> Result<Tensor> {
        let mut guard = self.session.lock().expect("session lock poisoned");
        let session = guard
            .as_mut()
            .ok_or_else(|| RecognitionError::Inference("session is closed".into()))?;

        let input_ref = TensorRef::from_array_view(input)
            .map_err(|e| RecognitionError::Inference(format!("input binding: {e}")))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_ref])
            .map_err(|e| RecognitionError::Inference(e.to_string()))?;

        let value = outputs
            .iter()
            .find(|(name, _)| *name == self.output_name.as_str())
            .or_else(|| outputs.iter().next())
            .map(|(_, value)| value)
            .ok_or_else(|| RecognitionError::Inference("model produced no output".into()))?;
        let view = value.try_extract_array::<f32>().map_err(|e| {
            RecognitionError::Inference(format!("unexpected output element type: {e}"))
        })?;
        Ok(Tensor::from_view(view))
    }

    /// Release the native session. Further `run` calls fail; further
    /// `close` calls are no-ops.
    pub fn close(&self) {
        let mut guard = self.session.lock().expect("session lock poisoned");
        if guard.take().is_some() {
            debug!(model = %self.path.display(), "session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.session.lock().expect("session lock poisoned").is_none()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            model_path: self.path.display().to_string(),
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            input_shape: self.input_shape.clone(),
            output_shape: self.output_shape.clone(),
        }
    }
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSession")
            .field("path", &self.path)
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn fixed_dim(shape: &[i64], index: usize) -> Option<u32> {
    match shape.get(index) {
        Some(&d) if d > 0 => Some(d as u32),
        _ => None,
    }
}

fn validate_single_input(session: &Session) -> Result<(String, Vec<i64>)> {
    if session.inputs.len() != 1 {
        return Err(RecognitionError::ModelShape(format!(
            "expected exactly one input, model has {}",
            session.inputs.len()
        )));
    }
    let input = &session.inputs[0];
    let ValueType::Tensor { ty, shape, .. } = &input.input_type else {
        return Err(RecognitionError::ModelShape(
            "model input is not a tensor".into(),
        ));
    };
    if *ty != TensorElementType::Float32 {
        return Err(RecognitionError::ModelShape(format!(
            "model input must be float32, got {ty:?}"
        )));
    }
    let dims: Vec<i64> = shape.iter().copied().collect();
    if dims.len() != 4 {
        return Err(RecognitionError::ModelShape(format!(
            "model input must be rank 4 NCHW, got {dims:?}"
        )));
    }
    if dims[1] > 0 && dims[1] != 3 {
        return Err(RecognitionError::ModelShape(format!(
            "model input must take 3 channels, got {}",
            dims[1]
        )));
    }
    Ok((input.name.clone(), dims))
}

fn validate_single_output(session: &Session) -> Result<(String, Vec<i64>)> {
    if session.outputs.len() != 1 {
        return Err(RecognitionError::ModelShape(format!(
            "expected exactly one output, model has {}",
            session.outputs.len()
        )));
    }
    let output = &session.outputs[0];
    let ValueType::Tensor { shape, .. } = &output.output_type else {
        return Err(RecognitionError::ModelShape(
            "model output is not a tensor".into(),
        ));
    };
    let dims: Vec<i64> = shape.iter().copied().collect();
    Ok((output.name.clone(), dims))
}
