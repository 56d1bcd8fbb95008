//! Model access: where the classifier and its label metadata come from, and how they
//! are turned into a validated [`ModelArtifact`].
//!
//! Locations are resolved once, with priority CLI flag > environment variable > default.

use crate::cache_common;
use crate::color_utils::symbols;
use crate::detector::ArtifactLoader;
use crate::error::LoadError;
use crate::model::{ArtifactInfo, LabelMetadata, ModelArtifact};
use crate::onnx_session::OnnxClassifier;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_PATH_ENV: &str = "SACKGRADE_MODEL_PATH";
pub const META_PATH_ENV: &str = "SACKGRADE_META_PATH";
pub const MODEL_CHECKSUM_ENV: &str = "SACKGRADE_MODEL_CHECKSUM";

pub const DEFAULT_MODEL_PATH: &str = "models/model_svm_karung.onnx";
pub const DEFAULT_META_PATH: &str = "models/model_meta.json";

/// Model overrides as given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliModelInfo {
    pub model_path: Option<String>,
    pub meta_path: Option<String>,
    pub model_checksum: Option<String>,
}

/// Fully resolved model and metadata locations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelLocations {
    pub model_path: PathBuf,
    pub meta_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_checksum: Option<String>,
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ModelLocations {
    /// Resolve locations from CLI overrides, then environment variables, then defaults.
    pub fn resolve(cli: &CliModelInfo) -> Self {
        let model_path = cli
            .model_path
            .clone()
            .or_else(|| non_empty_env(MODEL_PATH_ENV))
            .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string());
        let meta_path = cli
            .meta_path
            .clone()
            .or_else(|| non_empty_env(META_PATH_ENV))
            .unwrap_or_else(|| DEFAULT_META_PATH.to_string());
        let model_checksum = cli
            .model_checksum
            .clone()
            .or_else(|| non_empty_env(MODEL_CHECKSUM_ENV))
            .map(|c| c.trim().to_lowercase());

        log::debug!(
            "{} Model: {model_path}, metadata: {meta_path}",
            symbols::checking()
        );

        Self {
            model_path: PathBuf::from(model_path),
            meta_path: PathBuf::from(meta_path),
            model_checksum,
        }
    }
}

/// Read model bytes, rejecting missing and empty files and verifying the checksum.
fn read_model_bytes(path: &Path, expected_md5: Option<&str>) -> Result<(Vec<u8>, String), LoadError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(LoadError::ModelNotFound(display));
    }

    let bytes = fs::read(path).map_err(|e| LoadError::Io {
        path: display.clone(),
        message: e.to_string(),
    })?;
    if bytes.is_empty() {
        return Err(LoadError::Model {
            path: display,
            message: "model file is empty (0 bytes)".to_string(),
        });
    }

    let checksum = cache_common::calculate_md5_bytes(&bytes);
    if let Some(expected) = expected_md5 {
        if checksum != expected {
            return Err(LoadError::ChecksumMismatch {
                path: display,
                expected: expected.to_string(),
                actual: checksum,
            });
        }
        log::debug!(
            "{} Model checksum verified",
            symbols::completed_successfully()
        );
    }

    let size_mb = bytes.len() as f64 / (1024.0 * 1024.0);
    log::debug!(
        "{} Model file size: {size_mb:.2} MB",
        symbols::completed_successfully()
    );

    Ok((bytes, checksum))
}

/// Loads an ONNX classifier and its JSON label metadata from disk.
#[derive(Debug, Clone)]
pub struct OnnxArtifactLoader {
    pub locations: ModelLocations,
    pub device: String,
}

impl OnnxArtifactLoader {
    pub fn new(locations: ModelLocations, device: impl Into<String>) -> Self {
        Self {
            locations,
            device: device.into(),
        }
    }
}

impl ArtifactLoader for OnnxArtifactLoader {
    fn load(&self) -> Result<ModelArtifact, LoadError> {
        let model_path = &self.locations.model_path;
        let meta_path = &self.locations.meta_path;

        // Metadata first: it is cheap and catches most misconfigurations.
        let labels = LabelMetadata::from_json_file(meta_path)?;
        let (bytes, checksum) =
            read_model_bytes(model_path, self.locations.model_checksum.as_deref())?;

        let classifier = OnnxClassifier::from_bytes(&bytes, &self.device).map_err(|e| {
            let file_info = cache_common::get_file_info(model_path)
                .unwrap_or_else(|e| format!("Error getting file info: {e}"));
            LoadError::Model {
                path: model_path.display().to_string(),
                message: format!("{e:#} ({file_info})"),
            }
        })?;

        let info = ArtifactInfo {
            model_path: model_path.display().to_string(),
            meta_path: meta_path.display().to_string(),
            model_size_bytes: bytes.len(),
            model_checksum: checksum,
        };

        Ok(ModelArtifact::new(Box::new(classifier), labels)?.with_info(info))
    }

    fn describe(&self) -> String {
        format!(
            "{} (labels: {})",
            self.locations.model_path.display(),
            self.locations.meta_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn clear_env() {
        std::env::remove_var(MODEL_PATH_ENV);
        std::env::remove_var(META_PATH_ENV);
        std::env::remove_var(MODEL_CHECKSUM_ENV);
    }

    #[test]
    #[serial]
    fn test_resolve_defaults() {
        clear_env();
        let locations = ModelLocations::resolve(&CliModelInfo::default());
        assert_eq!(locations.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(locations.meta_path, PathBuf::from(DEFAULT_META_PATH));
        assert_eq!(locations.model_checksum, None);
    }

    #[test]
    #[serial]
    fn test_resolve_env_then_cli_priority() {
        clear_env();
        std::env::set_var(MODEL_PATH_ENV, "/env/model.onnx");
        std::env::set_var(META_PATH_ENV, "/env/meta.json");
        std::env::set_var(MODEL_CHECKSUM_ENV, "ABCDEF");

        let from_env = ModelLocations::resolve(&CliModelInfo::default());
        assert_eq!(from_env.model_path, PathBuf::from("/env/model.onnx"));
        assert_eq!(from_env.meta_path, PathBuf::from("/env/meta.json"));
        assert_eq!(from_env.model_checksum.as_deref(), Some("abcdef"));

        let cli = CliModelInfo {
            model_path: Some("/cli/model.onnx".into()),
            meta_path: None,
            model_checksum: None,
        };
        let from_cli = ModelLocations::resolve(&cli);
        assert_eq!(from_cli.model_path, PathBuf::from("/cli/model.onnx"));
        assert_eq!(from_cli.meta_path, PathBuf::from("/env/meta.json"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_env_values_are_ignored() {
        clear_env();
        std::env::set_var(MODEL_PATH_ENV, "  ");
        let locations = ModelLocations::resolve(&CliModelInfo::default());
        assert_eq!(locations.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        clear_env();
    }

    #[test]
    fn test_read_model_bytes_errors() {
        let temp_dir = tempdir().unwrap();

        let missing = temp_dir.path().join("missing.onnx");
        assert!(matches!(
            read_model_bytes(&missing, None),
            Err(LoadError::ModelNotFound(_))
        ));

        let empty = temp_dir.path().join("empty.onnx");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(
            read_model_bytes(&empty, None),
            Err(LoadError::Model { .. })
        ));

        let model = temp_dir.path().join("model.onnx");
        fs::write(&model, "hello world").unwrap();
        let (bytes, checksum) =
            read_model_bytes(&model, Some("5eb63bbbe01eeed093cb22bb8f5acdc3")).unwrap();
        assert_eq!(bytes, b"hello world");
        assert_eq!(checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        assert!(matches!(
            read_model_bytes(&model, Some("00000000000000000000000000000000")),
            Err(LoadError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_loader_reports_missing_metadata() {
        let temp_dir = tempdir().unwrap();
        let loader = OnnxArtifactLoader::new(
            ModelLocations {
                model_path: temp_dir.path().join("model.onnx"),
                meta_path: temp_dir.path().join("meta.json"),
                model_checksum: None,
            },
            "cpu",
        );
        assert!(matches!(
            loader.load(),
            Err(LoadError::MetadataNotFound(_))
        ));
    }

    #[test]
    fn test_loader_reports_missing_model() {
        let temp_dir = tempdir().unwrap();
        let meta_path = temp_dir.path().join("meta.json");
        fs::write(
            &meta_path,
            r#"{"classes": ["merah", "kuning", "hijau"], "grades": ["A", "B", "C"]}"#,
        )
        .unwrap();

        let loader = OnnxArtifactLoader::new(
            ModelLocations {
                model_path: temp_dir.path().join("model.onnx"),
                meta_path,
                model_checksum: None,
            },
            "cpu",
        );
        let err = loader.load().unwrap_err();
        assert!(matches!(err, LoadError::ModelNotFound(_)));
        assert!(loader.describe().contains("model.onnx"));
    }
}
