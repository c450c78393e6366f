//! Recognizer backends behind one contract.
//!
//! Each algorithm family implements [`Recognizer`]; [`create`] builds the
//! backend for an [`Algorithm`] at runtime. Fisher has no compiled backend and
//! is reported as [`RecognizerError::UnknownAlgorithm`].

pub mod eigen;
pub mod embedding;
pub mod histogram;

pub use eigen::EigenRecognizer;
pub use embedding::EmbeddingRecognizer;
pub use histogram::HistogramRecognizer;

use crate::embedder::EmbedderKind;
use crate::preprocess::{Preprocessor, Sample, SampleSpec};
use crate::types::{Algorithm, Prediction, TrainingRecord};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("no recognizer backend is compiled for algorithm {0}")]
    UnknownAlgorithm(Algorithm),
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("sample does not fit the recognizer: expected {expected:?}, got {width}x{height}x{channels}")]
    SampleMismatch {
        expected: SampleSpec,
        width: usize,
        height: usize,
        channels: usize,
    },
    #[error("{samples} samples but {labels} labels")]
    LabelMismatch { samples: usize, labels: usize },
    #[error("stored vector has {actual} values, expected {expected}")]
    VectorLength { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{0} support was not compiled in")]
    Unsupported(&'static str),
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Capability set shared by every recognition algorithm.
pub trait Recognizer: Send {
    fn algorithm(&self) -> Algorithm;

    /// Layout of the samples this recognizer consumes.
    fn sample_spec(&self) -> SampleSpec;

    /// Convert an image into this recognizer's sample layout.
    /// Failures yield an empty sample.
    fn prepare(&self, image: &DynamicImage) -> Sample {
        Preprocessor::new(self.sample_spec()).prepare(image)
    }

    /// Predict a label, or [`Prediction::unknown`] when outside the acceptance bound.
    fn recognize(&mut self, sample: &Sample) -> Result<Prediction, RecognizerError>;

    /// Add labelled samples to the model and return the records to persist.
    fn train(
        &mut self,
        samples: &[Sample],
        labels: &[i64],
        context: &str,
    ) -> Result<Vec<TrainingRecord>, RecognizerError>;

    /// Set the acceptance bound from a 0–1 threshold/accuracy value.
    fn set_threshold(&mut self, value: f32);

    /// Number of neighbours consulted per query. Only meaningful for embeddings.
    fn set_k_nearest(&mut self, _k: usize) {}

    /// Load previously persisted records into an empty model.
    fn restore(&mut self, records: Vec<TrainingRecord>) -> Result<(), RecognizerError>;

    /// Number of stored training vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the backend for `algorithm`.
pub fn create(
    algorithm: Algorithm,
    embedder: &EmbedderKind,
) -> Result<Box<dyn Recognizer>, RecognizerError> {
    match algorithm {
        Algorithm::Histogram => Ok(Box::new(HistogramRecognizer::new())),
        Algorithm::Eigen => Ok(Box::new(EigenRecognizer::new())),
        Algorithm::Embedding => Ok(Box::new(EmbeddingRecognizer::new(embedder.load()?))),
        Algorithm::Fisher => Err(RecognizerError::UnknownAlgorithm(algorithm)),
    }
}

/// Check that `sample` has the layout `spec` describes.
pub(crate) fn check_sample(sample: &Sample, spec: SampleSpec) -> Result<(), RecognizerError> {
    if sample.matches(spec) {
        Ok(())
    } else {
        Err(RecognizerError::SampleMismatch {
            expected: spec,
            width: sample.width(),
            height: sample.height(),
            channels: sample.channels(),
        })
    }
}

/// Check that samples and labels pair up.
pub(crate) fn check_labels(samples: &[Sample], labels: &[i64]) -> Result<(), RecognizerError> {
    if samples.len() == labels.len() {
        Ok(())
    } else {
        Err(RecognizerError::LabelMismatch {
            samples: samples.len(),
            labels: labels.len(),
        })
    }
}

/// Map a 0–1 accuracy onto a maximum accepted normalized distance.
pub(crate) fn distance_bound(accuracy: f32) -> f32 {
    1.0 - accuracy.clamp(0.0, 1.0)
}
