//! Batch detection over image files: one shared detector, one entry per image, and a
//! harvest-style summary (grade breakdown, mean confidence) over the successes.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::color_utils::{progress::create_batch_progress_bar, symbols};
use crate::config::DetectConfig;
use crate::detector::Detector;
use crate::error::{DetectorError, DetectorResult, ErrorKind};
use crate::image_input::{collect_images_from_sources, decode_image_bytes, ImageInputConfig};
use crate::model_access::{ModelLocations, OnnxArtifactLoader};
use crate::onnx_session::determine_optimal_device;
use crate::output_manager::OutputManager;
use crate::prediction::{round2, DetectionResponse};
use crate::progress::remove_progress_bar;
use crate::shared_metadata::{
    collect_sackgrade_env_vars, DetectSections, ExecutionContext, InputProcessing, SystemInfo,
};

/// Outcome for one image of a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub image: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DetectionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Successful detections per grade label
    pub grade_breakdown: BTreeMap<String, usize>,
    /// Mean confidence over successful detections, rounded to 2 decimals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f64>,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    fn push(&mut self, entry: BatchEntry) {
        self.total += 1;
        match &entry.result {
            Some(response) => {
                self.successful += 1;
                *self
                    .grade_breakdown
                    .entry(response.result.grade_label.clone())
                    .or_insert(0) += 1;
            }
            None => self.failed += 1,
        }
        self.entries.push(entry);
    }

    fn finish(&mut self) {
        let confidences: Vec<f64> = self
            .successes()
            .map(|(_, response)| response.result.confidence_percent)
            .collect();
        self.average_confidence = (!confidences.is_empty())
            .then(|| round2(confidences.iter().sum::<f64>() / confidences.len() as f64));
    }

    /// Successful entries with their detection
    pub fn successes(&self) -> impl Iterator<Item = (&BatchEntry, &DetectionResponse)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.result.as_ref().map(|response| (entry, response)))
    }
}

fn detect_file(detector: &Detector, path: &Path) -> DetectorResult<DetectionResponse> {
    let bytes = fs::read(path).map_err(|e| {
        DetectorError::InvalidImage(format!("cannot read {}: {e}", path.display()))
    })?;
    let image = decode_image_bytes(&bytes)?;
    Ok(detector.predict(&image)?.into())
}

/// Classify every image in `paths` with one shared detector.
///
/// Load failures always abort. Other failures abort in strict mode and are recorded as
/// error entries otherwise.
pub fn detect_batch(detector: &Detector, paths: &[PathBuf], strict: bool) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    let progress_bar = create_batch_progress_bar(paths.len());

    for (index, path) in paths.iter().enumerate() {
        let start = Instant::now();
        let outcome = detect_file(detector, path);
        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        let entry = match outcome {
            Ok(response) => {
                log::info!(
                    "{} {} ({}/{}): {} grade {} ({:.2}%)",
                    symbols::completed_successfully(),
                    path.display(),
                    index + 1,
                    paths.len(),
                    response.result.color_label,
                    response.result.grade_label,
                    response.result.confidence_percent
                );
                BatchEntry {
                    image: path.display().to_string(),
                    success: true,
                    result: Some(response),
                    error: None,
                    error_kind: None,
                    processing_time_ms,
                }
            }
            Err(e) if e.kind() == ErrorKind::Load || strict => {
                if let Some(pb) = &progress_bar {
                    pb.finish_and_clear();
                    remove_progress_bar(pb);
                }
                return Err(e).with_context(|| format!("Failed to process {}", path.display()));
            }
            Err(e) => {
                log::warn!(
                    "{}Failed to process {} ({}/{}): {e}",
                    symbols::warning(),
                    path.display(),
                    index + 1,
                    paths.len()
                );
                BatchEntry {
                    image: path.display().to_string(),
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                    processing_time_ms,
                }
            }
        };
        report.push(entry);

        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
    }

    if let Some(pb) = &progress_bar {
        pb.finish_and_clear();
        remove_progress_bar(pb);
    }

    report.finish();
    Ok(report)
}

/// Run the detect command: collect sources, load the model once, classify, and write
/// per-image metadata when requested.
pub fn run_detection(config: DetectConfig) -> Result<BatchReport> {
    let start_timestamp = Utc::now();
    let run_start = Instant::now();
    let command_line: Vec<String> = std::env::args().collect();

    let image_config = ImageInputConfig::from_strict_flag(config.base.strict);
    let image_files = collect_images_from_sources(&config.base.sources, &image_config)?;

    if image_files.is_empty() {
        log::warn!("{}No valid images found to process", symbols::warning());
        return Ok(BatchReport::default());
    }
    log::info!(
        "{} Found {} image(s) to process",
        symbols::resources_found(),
        image_files.len()
    );

    let device = determine_optimal_device(&config.base.device);
    let locations = ModelLocations::resolve(&config.cli_model_info());
    let detector = Detector::new(OnnxArtifactLoader::new(locations, device.device.clone()));

    let load_start = Instant::now();
    let artifact = detector.warm_up().context("Failed to load sack classifier")?;
    let model_load_time_ms = load_start.elapsed().as_secs_f64() * 1000.0;

    let report = detect_batch(&detector, &image_files, config.base.strict)?;

    if !config.base.skip_metadata {
        let info = artifact.info();
        let system = SystemInfo {
            device_requested: Some(config.base.device.clone()),
            device_selected: Some(device.device.clone()),
            model_path: Some(info.model_path.clone()),
            meta_path: Some(info.meta_path.clone()),
            model_size_bytes: Some(info.model_size_bytes as u64),
            model_load_time_ms: Some(model_load_time_ms),
            model_checksum: Some(info.model_checksum.clone()),
        };
        let config_value = toml::Value::try_from(&config)?;
        let env_vars = collect_sackgrade_env_vars();

        for (entry, response) in report.successes() {
            let image_path = Path::new(&entry.image);
            let output_manager = OutputManager::new(&config.base, image_path);

            let sections = DetectSections {
                core: Some(toml::Value::try_from(response)?),
                config: Some(config_value.clone()),
                execution: Some(ExecutionContext {
                    timestamp: Some(start_timestamp),
                    sackgrade_version: Some(env!("CARGO_PKG_VERSION").to_string()),
                    command_line: Some(command_line.clone()),
                    processing_time_ms: Some(entry.processing_time_ms),
                    sackgrade_env_vars: env_vars.clone(),
                }),
                system: Some(system.clone()),
                input: Some(InputProcessing {
                    image_path: output_manager.make_relative_to_metadata(image_path)?,
                    strict_mode: config.base.strict,
                }),
            };
            output_manager.save_detect_metadata(sections)?;
        }
    }

    let total_time = run_start.elapsed();
    if report.failed == 0 {
        log::info!(
            "{} Processed {} image(s) in {:.1}s",
            symbols::completed_successfully(),
            report.successful,
            total_time.as_secs_f64()
        );
    } else {
        log::warn!(
            "{}{} of {} image(s) failed to process",
            symbols::completed_partially_successfully(),
            report.failed,
            report.total
        );
    }

    Ok(report)
}
