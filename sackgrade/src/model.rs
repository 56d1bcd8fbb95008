//! Model adapter: a loaded classifier plus the labels describing its classes.
//!
//! The classifier is a black box with one capability, [`Classifier::predict_distribution`].
//! The class index is always derived from that distribution, so the reported label and
//! its confidence cannot disagree.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{DetectorError, DetectorResult, LoadError};
use crate::features::{FeatureVector, FEATURE_DIM};

/// A pretrained probabilistic classifier.
pub trait Classifier: Send + Sync {
    /// Number of input features the classifier was trained on, if it declares one.
    fn input_width(&self) -> Option<usize>;

    /// Number of classes the classifier distinguishes, if it declares one.
    fn class_count(&self) -> Option<usize>;

    /// Per-class probabilities for one feature vector.
    fn predict_distribution(&self, features: &FeatureVector) -> anyhow::Result<Vec<f32>>;
}

/// Index-aligned label arrays: `classes[i]` and `grades[i]` describe trained class `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMetadata {
    pub classes: Vec<String>,
    pub grades: Vec<String>,
}

impl LabelMetadata {
    pub fn new(classes: Vec<String>, grades: Vec<String>) -> Result<Self, LoadError> {
        let labels = Self { classes, grades };
        labels.validate()?;
        Ok(labels)
    }

    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, LoadError> {
        let labels: Self =
            serde_json::from_str(json).map_err(|e| LoadError::MalformedMetadata {
                path: origin.to_string(),
                message: e.to_string(),
            })?;
        labels.validate()?;
        Ok(labels)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::MetadataNotFound(path.display().to_string()));
        }
        let json = fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&json, &path.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn validate(&self) -> Result<(), LoadError> {
        if self.classes.is_empty() {
            return Err(LoadError::ModelMetadataMismatch(
                "label metadata has no classes".into(),
            ));
        }
        if self.classes.len() != self.grades.len() {
            return Err(LoadError::ModelMetadataMismatch(format!(
                "{} classes but {} grades",
                self.classes.len(),
                self.grades.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.classes.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(LoadError::ModelMetadataMismatch(format!(
                "duplicate class label '{dup}'"
            )));
        }
        Ok(())
    }
}

/// Provenance of a loaded model, recorded in output metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub model_path: String,
    pub meta_path: String,
    pub model_size_bytes: usize,
    pub model_checksum: String,
}

/// An immutable classifier with validated labels.
pub struct ModelArtifact {
    classifier: Box<dyn Classifier>,
    labels: LabelMetadata,
    info: ArtifactInfo,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("labels", &self.labels)
            .field("info", &self.info)
            .finish()
    }
}

impl ModelArtifact {
    /// Pair a classifier with its labels, failing fast on any dimensional mismatch.
    pub fn new(
        classifier: Box<dyn Classifier>,
        labels: LabelMetadata,
    ) -> Result<Self, LoadError> {
        labels.validate()?;

        if let Some(width) = classifier.input_width() {
            if width != FEATURE_DIM {
                return Err(LoadError::ModelMetadataMismatch(format!(
                    "model expects {width} input features, extractor produces {FEATURE_DIM}"
                )));
            }
        }

        if let Some(count) = classifier.class_count() {
            if count != labels.len() {
                return Err(LoadError::ModelMetadataMismatch(format!(
                    "model has {count} classes, metadata lists {}",
                    labels.len()
                )));
            }
        }

        Ok(Self {
            classifier,
            labels,
            info: ArtifactInfo::default(),
        })
    }

    pub fn with_info(mut self, info: ArtifactInfo) -> Self {
        self.info = info;
        self
    }

    pub fn labels(&self) -> &LabelMetadata {
        &self.labels
    }

    pub fn info(&self) -> &ArtifactInfo {
        &self.info
    }

    /// Classify one feature vector, returning the argmax class and the full distribution.
    pub fn predict_class(&self, features: &FeatureVector) -> DetectorResult<(usize, Vec<f32>)> {
        let probabilities = self
            .classifier
            .predict_distribution(features)
            .map_err(|e| DetectorError::Prediction(format!("{e:#}")))?;

        if probabilities.len() != self.labels.len() {
            return Err(DetectorError::Prediction(format!(
                "classifier returned {} probabilities for {} classes",
                probabilities.len(),
                self.labels.len()
            )));
        }
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
            return Err(DetectorError::Prediction(format!(
                "classifier returned non-finite probability {bad}"
            )));
        }

        let class_index = argmax(&probabilities)
            .ok_or_else(|| DetectorError::Prediction("empty distribution".into()))?;

        debug!(
            "Predicted class {class_index} ({}) with p={:.4}",
            self.labels.classes[class_index], probabilities[class_index]
        );

        Ok((class_index, probabilities))
    }
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
