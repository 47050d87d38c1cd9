use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the recognition subsystem.
#[derive(Error, Debug)]
pub enum RecognitionError {
    /// Invalid or missing configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required file or library is missing or unusable.
    #[error("resource error: {0}")]
    Resource(String),

    /// The inference runtime could not be initialized.
    #[error("runtime init failed: {0}")]
    RuntimeInit(String),

    /// The model's declared shapes do not match what this engine supports.
    #[error("model shape error: {0}")]
    ModelShape(String),

    /// Cropping, resizing or normalisation failed.
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),

    /// The runtime rejected or failed an inference call.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Decoder output could not be interpreted.
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecognitionError {
    pub fn missing_file(path: &PathBuf) -> Self {
        Self::Resource(format!("file not found: {}", path.display()))
    }
}

pub type Result<T> = std::result::Result<T, RecognitionError>;
