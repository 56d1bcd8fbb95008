//! Error taxonomy for the classification core.
//!
//! Request-level failures (`InvalidImage`, `FeatureExtraction`, `Prediction`) abort a
//! single prediction and leave the detector usable. `Load` errors are fatal: a detector
//! that failed to load reports the same `LoadError` on every later call.

use serde::Serialize;
use thiserror::Error;

/// Fault class of a [`DetectorError`], used by callers at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Missing or malformed model/metadata, or a detector that never became ready.
    Load,
    /// The caller supplied an unusable image.
    Input,
    /// Feature extraction or inference failed on a valid image.
    Server,
}

/// Fatal error raised while loading the model artifact or its label metadata.
///
/// Cloneable so a failed detector can hand out the same error to every caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),

    #[error("label metadata not found: {0}")]
    MetadataNotFound(String),

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed label metadata in {path}: {message}")]
    MalformedMetadata { path: String, message: String },

    #[error("failed to load model {path}: {message}")]
    Model { path: String, message: String },

    #[error("model checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Model input width, class count and label arrays disagree. Detected before the
    /// detector becomes ready, so callers see it as `DetectorError::Load`.
    #[error("model metadata mismatch: {0}")]
    ModelMetadataMismatch(String),
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    /// A loaded model produced a class index outside its label arrays.
    #[error("model metadata mismatch: {0}")]
    ModelMetadataMismatch(String),

    #[error("model is not loaded")]
    ModelNotLoaded,

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl DetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::InvalidImage(_) => ErrorKind::Input,
            DetectorError::FeatureExtraction(_)
            | DetectorError::Prediction(_)
            | DetectorError::ModelMetadataMismatch(_) => ErrorKind::Server,
            DetectorError::ModelNotLoaded | DetectorError::Load(_) => ErrorKind::Load,
        }
    }

    /// True when the failure was caused by the caller's input.
    pub fn is_client_fault(&self) -> bool {
        self.kind() == ErrorKind::Input
    }
}

pub type DetectorResult<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DetectorError::InvalidImage("empty".into()).kind(),
            ErrorKind::Input
        );
        assert_eq!(
            DetectorError::FeatureExtraction("bad raster".into()).kind(),
            ErrorKind::Server
        );
        assert_eq!(
            DetectorError::Prediction("boom".into()).kind(),
            ErrorKind::Server
        );
        assert_eq!(DetectorError::ModelNotLoaded.kind(), ErrorKind::Load);

        let load: DetectorError = LoadError::ModelNotFound("x.onnx".into()).into();
        assert_eq!(load.kind(), ErrorKind::Load);
        assert!(!load.is_client_fault());
    }

    #[test]
    fn test_load_error_display() {
        let err = LoadError::ModelNotFound("/missing/model.onnx".into());
        assert_eq!(err.to_string(), "model file not found: /missing/model.onnx");

        let wrapped = DetectorError::from(err.clone());
        assert_eq!(wrapped.to_string(), err.to_string());
    }
}
