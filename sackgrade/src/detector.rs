//! Detector facade: one `predict(image)` call over normalize → extract → classify → map,
//! plus the lifecycle of the shared model.
//!
//! ```text
//! Unloaded ──load──▶ Loading ──ok──▶ Ready   (terminal)
//!                           └─err──▶ Failed  (terminal)
//! ```
//!
//! The load runs exactly once. Callers arriving while it is in progress block until it
//! finishes. A failed load is never retried: every later call gets the first error.
//! Share a detector between threads with `Arc<Detector>`.

use image::RgbImage;
use log::{debug, error, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::color_utils::symbols;
use crate::error::{DetectorError, DetectorResult, LoadError};
use crate::features::extract;
use crate::model::ModelArtifact;
use crate::normalize::normalize;
use crate::prediction::{to_result, PredictionResult};

/// Source of the model artifact, invoked at most once per detector.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self) -> Result<ModelArtifact, LoadError>;

    /// Human-readable description of where the artifact comes from.
    fn describe(&self) -> String {
        "custom loader".to_string()
    }
}

impl<F> ArtifactLoader for F
where
    F: Fn() -> Result<ModelArtifact, LoadError> + Send + Sync,
{
    fn load(&self) -> Result<ModelArtifact, LoadError> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Counts a caller as loading until it leaves `warm_up`, including by unwinding.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(loading: &'a AtomicUsize) -> Self {
        loading.fetch_add(1, Ordering::AcqRel);
        Self(loading)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Detector {
    loader: Box<dyn ArtifactLoader>,
    artifact: OnceLock<Result<ModelArtifact, LoadError>>,
    loading: AtomicUsize,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("source", &self.loader.describe())
            .field("state", &self.state())
            .finish()
    }
}

impl Detector {
    pub fn new(loader: impl ArtifactLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            artifact: OnceLock::new(),
            loading: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> DetectorState {
        match self.artifact.get() {
            Some(Ok(_)) => DetectorState::Ready,
            Some(Err(_)) => DetectorState::Failed,
            None if self.loading.load(Ordering::Acquire) > 0 => DetectorState::Loading,
            None => DetectorState::Unloaded,
        }
    }

    /// Load the model if that has not happened yet and return it.
    pub fn warm_up(&self) -> Result<&ModelArtifact, LoadError> {
        if let Some(loaded) = self.artifact.get() {
            return loaded.as_ref().map_err(Clone::clone);
        }

        let _loading = LoadingGuard::enter(&self.loading);
        self.artifact
            .get_or_init(|| {
                info!(
                    "{} Loading model from {}",
                    symbols::system_setup(),
                    self.loader.describe()
                );

                let loaded = self.loader.load();
                match &loaded {
                    Ok(artifact) => info!(
                        "{} Model loaded ({} classes: {})",
                        symbols::model_loaded(),
                        artifact.labels().len(),
                        artifact.labels().classes.join(", ")
                    ),
                    Err(e) => error!("{} Failed to load model: {e}", symbols::operation_failed()),
                }
                loaded
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// The loaded model, without triggering a load.
    pub fn artifact(&self) -> DetectorResult<&ModelArtifact> {
        match self.artifact.get() {
            Some(Ok(artifact)) => Ok(artifact),
            Some(Err(e)) => Err(e.clone().into()),
            None => Err(DetectorError::ModelNotLoaded),
        }
    }

    /// Classify one RGB image, loading the model on first use.
    pub fn predict(&self, image: &RgbImage) -> DetectorResult<PredictionResult> {
        let artifact = self.warm_up()?;
        predict_with(artifact, image)
    }
}

/// Run the full pipeline against an already loaded artifact.
pub fn predict_with(artifact: &ModelArtifact, image: &RgbImage) -> DetectorResult<PredictionResult> {
    let normalized = normalize(image)?;
    let features = extract(&normalized)?;
    let (class_index, probabilities) = artifact.predict_class(&features)?;
    let result = to_result(class_index, &probabilities, artifact.labels())?;

    debug!(
        "{} {} / grade {} ({:.2}%)",
        symbols::completed_successfully(),
        result.color_label,
        result.grade_label,
        result.confidence_percent
    );
    Ok(result)
}
