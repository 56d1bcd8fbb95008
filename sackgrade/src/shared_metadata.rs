use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-image metadata file, `<stem>.sackgrade.toml`
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct SackgradeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detect: Option<DetectSections>,
}

/// All sections written by the detect command
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DetectSections {
    // Detection result fields live at the top of the section
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub core: Option<toml::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<toml::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputProcessing>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sackgrade_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sackgrade_env_vars: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SystemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_requested: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_selected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_load_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_checksum: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InputProcessing {
    pub image_path: String,
    pub strict_mode: bool,
}

/// Load existing metadata from a file, or start fresh if it is missing or unreadable
pub fn load_or_create_metadata(path: &Path) -> Result<SackgradeMetadata> {
    if !path.exists() {
        return Ok(SackgradeMetadata::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata {}", path.display()))?;
    match toml::from_str::<SackgradeMetadata>(&content) {
        Ok(metadata) => Ok(metadata),
        Err(e) => {
            warn!(
                "{} Dropping existing metadata from {}:\n{}",
                crate::color_utils::symbols::warning(),
                path.display(),
                crate::color_utils::colors::warning_level(&e.to_string())
            );
            Ok(SackgradeMetadata::default())
        }
    }
}

pub fn save_metadata(metadata: &SackgradeMetadata, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let toml_content = toml::to_string_pretty(metadata).map_err(|e| {
        log::debug!("Metadata that failed to serialize: {metadata:#?}");
        anyhow::anyhow!("Failed to serialize metadata to TOML: {e}")
    })?;

    fs::write(path, toml_content)
        .with_context(|| format!("Failed to write metadata {}", path.display()))?;
    Ok(())
}

/// Metadata file path for an input image: next to it, or inside `output_dir`
pub fn get_metadata_path(input_path: &Path, output_dir: Option<&str>) -> Result<PathBuf> {
    let input_stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid input filename: {}", input_path.display()))?;

    let metadata_filename = format!("{input_stem}.sackgrade.toml");

    Ok(match output_dir {
        Some(output_dir) => Path::new(output_dir).join(metadata_filename),
        None => input_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(metadata_filename),
    })
}

/// All non-empty SACKGRADE_* environment variables
pub fn collect_sackgrade_env_vars() -> Option<HashMap<String, String>> {
    let vars: HashMap<String, String> = std::env::vars()
        .filter(|(key, value)| key.starts_with("SACKGRADE_") && !value.is_empty())
        .collect();

    if vars.is_empty() {
        None
    } else {
        Some(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn sample_sections() -> DetectSections {
        DetectSections {
            core: Some(
                toml::toml! {
                    color_label = "merah"
                    grade_label = "A"
                    confidence_percent = 90.0
                    sack_color = "red"

                    [probabilities]
                    merah = 90.0
                    kuning = 7.0
                    hijau = 3.0
                }
                .into(),
            ),
            config: Some(
                toml::toml! {
                    json_report = false
                }
                .into(),
            ),
            execution: Some(ExecutionContext {
                timestamp: Some(Utc::now()),
                sackgrade_version: Some("0.1.0".to_string()),
                command_line: Some(vec!["detect".to_string(), "sack.jpg".to_string()]),
                processing_time_ms: Some(3.2),
                sackgrade_env_vars: None,
            }),
            system: Some(SystemInfo {
                device_requested: Some("auto".to_string()),
                device_selected: Some("cpu".to_string()),
                model_path: Some("models/model_svm_karung.onnx".to_string()),
                meta_path: Some("models/model_meta.json".to_string()),
                model_size_bytes: Some(20480),
                model_load_time_ms: Some(12.5),
                model_checksum: Some("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string()),
            }),
            input: Some(InputProcessing {
                image_path: "sack.jpg".to_string(),
                strict_mode: true,
            }),
        }
    }

    #[test]
    fn test_toml_structure() {
        let metadata = SackgradeMetadata {
            detect: Some(sample_sections()),
        };

        let toml_output = toml::to_string_pretty(&metadata).unwrap();
        assert!(toml_output.contains("[detect]"));
        assert!(toml_output.contains("[detect.system]"));
        assert!(toml_output.contains("color_label = \"merah\""));

        let parsed: SackgradeMetadata = toml::from_str(&toml_output).unwrap();
        let detect = parsed.detect.unwrap();
        assert!(detect.config.is_some());
        assert!(detect.execution.is_some());
        assert_eq!(
            detect.system.unwrap().model_checksum.as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
    }

    #[test]
    fn test_save_and_reload_metadata() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("sack.sackgrade.toml");

        let metadata = SackgradeMetadata {
            detect: Some(sample_sections()),
        };
        save_metadata(&metadata, &path).unwrap();

        let reloaded = load_or_create_metadata(&path).unwrap();
        assert_eq!(reloaded.detect.unwrap().input.unwrap().image_path, "sack.jpg");
    }

    #[test]
    fn test_corrupt_metadata_is_replaced() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sack.sackgrade.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let metadata = load_or_create_metadata(&path).unwrap();
        assert!(metadata.detect.is_none());
    }

    #[test]
    fn test_get_metadata_path() {
        let input_path = Path::new("/gudang/batch-1/karung_07.jpg");
        let metadata_path = get_metadata_path(input_path, None).unwrap();
        assert_eq!(
            metadata_path,
            Path::new("/gudang/batch-1/karung_07.sackgrade.toml")
        );

        let with_output = get_metadata_path(input_path, Some("/out")).unwrap();
        assert_eq!(with_output, Path::new("/out/karung_07.sackgrade.toml"));
    }

    #[test]
    #[serial]
    fn test_collect_sackgrade_env_vars() {
        std::env::set_var("SACKGRADE_TEST_VAR", "value1");
        std::env::set_var("SACKGRADE_EMPTY_VAR", "");

        let vars = collect_sackgrade_env_vars().unwrap();
        assert_eq!(vars.get("SACKGRADE_TEST_VAR"), Some(&"value1".to_string()));
        assert!(!vars.contains_key("SACKGRADE_EMPTY_VAR"));

        std::env::remove_var("SACKGRADE_TEST_VAR");
        std::env::remove_var("SACKGRADE_EMPTY_VAR");
    }
}
