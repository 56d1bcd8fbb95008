//! Mapping from a class distribution to the domain-facing detection result.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{DetectorError, DetectorResult};
use crate::model::LabelMetadata;

/// Outcome of classifying one sack image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub color_label: String,
    pub grade_label: String,
    /// Probability of the chosen class, in percent, rounded to 2 decimals.
    pub confidence_percent: f64,
    /// Percent per color label, rounded to 2 decimals.
    pub probabilities: BTreeMap<String, f64>,
}

impl PredictionResult {
    pub fn sack_color(&self) -> SackColor {
        SackColor::from_label(&self.color_label)
    }
}

/// Canonical sack color, independent of the label language used by the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SackColor {
    Red,
    Yellow,
    Green,
    #[serde(untagged)]
    Other(String),
}

impl SackColor {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "merah" | "red" => SackColor::Red,
            "kuning" | "yellow" => SackColor::Yellow,
            "hijau" | "green" => SackColor::Green,
            other => SackColor::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SackColor::Red => "red",
            SackColor::Yellow => "yellow",
            SackColor::Green => "green",
            SackColor::Other(s) => s,
        }
    }
}

impl std::fmt::Display for SackColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection result as handed to the surrounding service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    pub sack_color: SackColor,
    pub detected_at: String,
}

impl From<PredictionResult> for DetectionResponse {
    fn from(result: PredictionResult) -> Self {
        let sack_color = result.sack_color();
        Self {
            result,
            sack_color,
            detected_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Round to two decimal places, halves to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

fn to_percent(probability: f32) -> f64 {
    round2(probability as f64 * 100.0)
}

/// Build the result for `class_index` from a distribution aligned with `labels`.
pub fn to_result(
    class_index: usize,
    probabilities: &[f32],
    labels: &LabelMetadata,
) -> DetectorResult<PredictionResult> {
    let (Some(color), Some(grade), Some(&p)) = (
        labels.classes.get(class_index),
        labels.grades.get(class_index),
        probabilities.get(class_index),
    ) else {
        return Err(DetectorError::ModelMetadataMismatch(format!(
            "class index {class_index} out of range for {} classes",
            labels.len()
        )));
    };

    let probabilities = labels
        .classes
        .iter()
        .zip(probabilities)
        .map(|(label, &p)| (label.clone(), to_percent(p)))
        .collect();

    Ok(PredictionResult {
        color_label: color.clone(),
        grade_label: grade.clone(),
        confidence_percent: to_percent(p),
        probabilities,
    })
}
