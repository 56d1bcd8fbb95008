//! Sack color and grade classification for harvest intake images.
//!
//! An image is resized to a fixed square, reduced to a 68-value color feature
//! vector (RGB and HSV statistics plus HSV histograms), and classified by a
//! pretrained model whose class index maps to a sack color and a quality grade.
//! [`detector::Detector`] is the entry point for library callers.

pub mod cache_common;
pub mod color_utils;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod image_input;
pub mod model;
pub mod model_access;
pub mod normalize;
pub mod onnx_session;
pub mod output_manager;
pub mod prediction;
pub mod processing;
pub mod progress;
pub mod shared_metadata;

pub use detector::{ArtifactLoader, Detector, DetectorState};
pub use error::{DetectorError, DetectorResult, ErrorKind, LoadError};
pub use prediction::{DetectionResponse, PredictionResult, SackColor};
