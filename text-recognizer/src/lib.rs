//! Text-line recognition over an ONNX Runtime session.
//!
//! The pipeline for one region: crop by the detector's geometry, orient the
//! patch, resize to the model height with right padding, normalise to NCHW
//! floats, run the model, CTC-decode the logits and map class indices to
//! charset tokens.

pub mod charset;
pub mod ctc;
pub mod engine;
pub mod error;
pub mod orient;
pub mod pool;
pub mod postprocess;
pub mod preprocess;
pub mod region;
pub mod session;
pub mod tensor;

pub use charset::{Charset, FilterCharset};
pub use engine::{
    DecodingMethod, RecognitionResult, Recognizer, RecognizerConfig, StageTimings,
};
pub use error::{RecognitionError, Result};
pub use orient::{LineOrienter, OrientationResult};
pub use region::{BoundingBox, DetectedRegion, Point};
pub use session::{ArenaExtendPolicy, GpuConfig, KernelSearchPolicy, SessionOptions};
