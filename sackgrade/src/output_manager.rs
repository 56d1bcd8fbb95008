//! Output placement for per-image files: next to the input image by default, or in
//! `--output-dir` when given.

use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};

use crate::config::BaseModelConfig;
use crate::shared_metadata::{
    get_metadata_path, load_or_create_metadata, save_metadata, DetectSections,
};

pub struct OutputManager<'a> {
    config: &'a BaseModelConfig,
    input_path: &'a Path,
}

impl<'a> OutputManager<'a> {
    pub fn new(config: &'a BaseModelConfig, input_path: &'a Path) -> Self {
        Self { config, input_path }
    }

    pub fn metadata_path(&self) -> Result<PathBuf> {
        get_metadata_path(self.input_path, self.config.output_dir.as_deref())
    }

    /// Express `path` relative to the metadata file, when metadata is written.
    pub fn make_relative_to_metadata(&self, path: &Path) -> Result<String> {
        if self.config.skip_metadata {
            return Ok(path.to_string_lossy().to_string());
        }
        make_path_relative_to_toml(path, &self.metadata_path()?)
    }

    /// Write the detect sections, keeping anything else already in the file.
    /// Returns the metadata path, or `None` when metadata is disabled.
    pub fn save_detect_metadata(&self, sections: DetectSections) -> Result<Option<PathBuf>> {
        if self.config.skip_metadata {
            return Ok(None);
        }

        let metadata_path = self.metadata_path()?;
        let mut metadata = load_or_create_metadata(&metadata_path)?;
        metadata.detect = Some(sections);
        save_metadata(&metadata, &metadata_path)?;

        debug!("📋 Saved metadata to: {}", metadata_path.display());
        Ok(Some(metadata_path))
    }
}

/// Make a file path relative to a TOML file, falling back to the path as given
pub fn make_path_relative_to_toml(file_path: &Path, toml_path: &Path) -> Result<String> {
    let relative = toml_path
        .parent()
        .and_then(|toml_dir| file_path.strip_prefix(toml_dir).ok());

    Ok(match relative {
        // Forward slashes so metadata reads the same on every platform
        Some(rel_path) => rel_path.to_string_lossy().replace('\\', "/"),
        None => file_path.to_string_lossy().to_string(),
    })
}
