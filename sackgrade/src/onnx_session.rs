use crate::color_utils::symbols;
use crate::features::{FeatureVector, FEATURE_DIM};
use crate::model::Classifier;
use anyhow::{anyhow, Result};
use log::Level;
use ndarray::Array2;
use ort::{
    execution_providers::CPUExecutionProvider,
    logging::LogLevel,
    session::Session,
    value::{Value, ValueType},
};
use std::sync::Mutex;

/// Output name used by sklearn-onnx converters for class probabilities.
const PROBABILITY_OUTPUT: &str = "probabilities";

fn log_level_from_ort(level: LogLevel) -> Level {
    match level {
        LogLevel::Verbose => Level::Trace,
        LogLevel::Info => Level::Trace,
        LogLevel::Warning => Level::Debug,
        LogLevel::Error => Level::Info,
        LogLevel::Fatal => Level::Error,
    }
}

fn ort_level_from_log(level: Level) -> LogLevel {
    match level {
        // ONNX's info level is closer to our debug/trace
        Level::Trace => LogLevel::Verbose,
        Level::Debug => LogLevel::Warning,
        Level::Info => LogLevel::Error,
        Level::Warn => LogLevel::Error,
        Level::Error => LogLevel::Fatal,
    }
}

/// Device selection result
#[derive(Debug, Clone)]
pub struct DeviceSelection {
    pub device: String,
    pub reason: String,
}

/// Determine the device to run on. The classifier is tiny, so anything but an
/// explicit request ends up on the CPU.
pub fn determine_optimal_device(requested_device: &str) -> DeviceSelection {
    match requested_device {
        "auto" => DeviceSelection {
            device: "cpu".to_string(),
            reason: "Auto-selected CPU".to_string(),
        },
        "cpu" => DeviceSelection {
            device: "cpu".to_string(),
            reason: "User explicitly chose cpu".to_string(),
        },
        other => {
            log::warn!("{}Unknown device '{other}', using CPU", symbols::warning());
            DeviceSelection {
                device: "cpu".to_string(),
                reason: format!("Unknown device '{other}', fell back to CPU"),
            }
        }
    }
}

/// Create an ONNX Runtime session from in-memory model bytes.
pub fn create_onnx_session(bytes: &[u8], device: &str) -> Result<Session> {
    let selection = determine_optimal_device(device);
    log::debug!(
        "{} Device: {} ({})",
        symbols::system_setup(),
        selection.device,
        selection.reason
    );

    // Choose the ORT log level based on what is enabled for us
    let ort_log_level = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
    ]
    .into_iter()
    .find(|&lvl| log::log_enabled!(lvl))
    .map(ort_level_from_log)
    .unwrap_or(LogLevel::Fatal);

    Session::builder()
        .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
        .with_logger(Box::new(|level, _, _, _, msg| {
            let log_level = log_level_from_ort(level);
            log::log!(log_level, "[onnx] {msg}")
        }))
        .map_err(|e| anyhow!("Failed to set logger: {}", e))?
        .with_log_level(ort_log_level)
        .map_err(|e| anyhow!("Failed to set log level: {}", e))?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .map_err(|e| anyhow!("Failed to set execution providers: {}", e))?
        .commit_from_memory(bytes)
        .map_err(|e| anyhow!("Failed to load model from memory: {}", e))
}

/// Tensor shape of an input or output, if it is a tensor.
fn tensor_shape(value_type: &ValueType) -> Option<Vec<i64>> {
    match value_type {
        ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
        _ => None,
    }
}

fn positive_dim(dim: Option<&i64>) -> Option<usize> {
    dim.copied().filter(|d| *d > 0).map(|d| d as usize)
}

/// Classifier backed by an ONNX graph taking `[1, 68]` floats and producing a
/// `[1, classes]` probability tensor.
pub struct OnnxClassifier {
    // Session::run needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_width: Option<usize>,
    class_count: Option<usize>,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("input_width", &self.input_width)
            .field("class_count", &self.class_count)
            .finish()
    }
}

impl OnnxClassifier {
    pub fn from_bytes(bytes: &[u8], device: &str) -> Result<Self> {
        Self::from_session(create_onnx_session(bytes, device)?)
    }

    pub fn from_session(session: Session) -> Result<Self> {
        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("Model has no inputs"))?;
        let input_shape = tensor_shape(&input.input_type)
            .ok_or_else(|| anyhow!("Model input '{}' is not a tensor", input.name))?;
        let input_name = input.name.clone();
        let input_width = positive_dim(input_shape.last());

        let output = session
            .outputs
            .iter()
            .find(|o| o.name == PROBABILITY_OUTPUT)
            .or_else(|| {
                session
                    .outputs
                    .iter()
                    .find(|o| tensor_shape(&o.output_type).is_some_and(|s| s.len() == 2))
            })
            .ok_or_else(|| anyhow!("Model has no [batch, classes] probability output"))?;
        let output_name = output.name.clone();
        let class_count =
            tensor_shape(&output.output_type).and_then(|s| positive_dim(s.last()));

        log::debug!(
            "ONNX classifier: input '{input_name}' {input_shape:?}, output '{output_name}' ({class_count:?} classes)"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_width,
            class_count,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn input_width(&self) -> Option<usize> {
        self.input_width
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    fn predict_distribution(&self, features: &FeatureVector) -> Result<Vec<f32>> {
        let input_array = Array2::from_shape_vec((1, FEATURE_DIM), features.as_slice().to_vec())?;
        let input_value = Value::from_array(input_array)
            .map_err(|e| anyhow!("Failed to create input value: {}", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => &input_value])
            .map_err(|e| anyhow!("Failed to run inference: {}", e))?;

        let output_view = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow!("Failed to extract output array: {}", e))?;

        Ok(output_view.iter().copied().collect())
    }
}
