//! Face embedders used by the embedding recognizer.
//!
//! [`PixelEmbedder`] is built in and needs no model file. [`ArcFaceEmbedder`]
//! runs the w600k_r50 ArcFace model through ONNX Runtime and is only
//! available with the `onnx` feature.

use crate::preprocess::{Sample, SampleSpec};
use crate::recognizer::RecognizerError;
use crate::types::Embedding;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

const PIXEL_INPUT_SIZE: u32 = 32;
const PIXEL_EMBEDDING_DIM: usize = (PIXEL_INPUT_SIZE * PIXEL_INPUT_SIZE * 3) as usize;
const PIXEL_DEFAULT_THRESHOLD: f32 = 0.9;
const PIXEL_MODEL_VERSION: &str = "pixel-v1";

/// Maps a full-colour sample to a fixed-length, L2-normalized embedding.
pub trait FaceEmbedder: Send {
    /// Square input size in pixels; samples are RGB at this size.
    fn input_size(&self) -> u32;

    fn dimension(&self) -> usize;

    /// Cosine similarity accepted as a match when no threshold parameter is set.
    fn default_threshold(&self) -> f32;

    fn model_version(&self) -> &str;

    fn embed(&mut self, sample: &Sample) -> Result<Embedding, RecognizerError>;

    fn sample_spec(&self) -> SampleSpec {
        SampleSpec::rgb(self.input_size())
    }
}

/// Builds a caller-supplied embedder each time a recognizer needs one.
pub type EmbedderFactory = Arc<dyn Fn() -> Result<Box<dyn FaceEmbedder>, RecognizerError> + Send + Sync>;

/// Which embedder to construct when the embedding recognizer is created.
#[derive(Clone, Default)]
pub enum EmbedderKind {
    /// Mean-centred colour pixels. Works without any model file.
    #[default]
    Pixel,
    /// ArcFace ONNX model at the given path.
    ArcFace { model_path: PathBuf },
    /// An embedder provided by the application.
    Custom(EmbedderFactory),
}

impl EmbedderKind {
    pub fn custom<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FaceEmbedder>, RecognizerError> + Send + Sync + 'static,
    {
        EmbedderKind::Custom(Arc::new(factory))
    }

    pub fn load(&self) -> Result<Box<dyn FaceEmbedder>, RecognizerError> {
        match self {
            EmbedderKind::Pixel => Ok(Box::new(PixelEmbedder)),
            #[cfg(feature = "onnx")]
            EmbedderKind::ArcFace { model_path } => {
                Ok(Box::new(arcface::ArcFaceEmbedder::load(&model_path.to_string_lossy())?))
            }
            #[cfg(not(feature = "onnx"))]
            EmbedderKind::ArcFace { .. } => Err(RecognizerError::Unsupported("ONNX")),
            EmbedderKind::Custom(factory) => factory(),
        }
    }
}

impl fmt::Debug for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbedderKind::Pixel => f.write_str("Pixel"),
            EmbedderKind::ArcFace { model_path } => {
                f.debug_struct("ArcFace").field("model_path", model_path).finish()
            }
            EmbedderKind::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl PartialEq for EmbedderKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EmbedderKind::Pixel, EmbedderKind::Pixel) => true,
            (EmbedderKind::ArcFace { model_path: a }, EmbedderKind::ArcFace { model_path: b }) => a == b,
            (EmbedderKind::Custom(a), EmbedderKind::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for EmbedderKind {}

/// Embeds the mean-centred colour pixels of a 32×32 sample.
///
/// Uniform samples have no direction after centring and are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelEmbedder;

impl FaceEmbedder for PixelEmbedder {
    fn input_size(&self) -> u32 {
        PIXEL_INPUT_SIZE
    }

    fn dimension(&self) -> usize {
        PIXEL_EMBEDDING_DIM
    }

    fn default_threshold(&self) -> f32 {
        PIXEL_DEFAULT_THRESHOLD
    }

    fn model_version(&self) -> &str {
        PIXEL_MODEL_VERSION
    }

    fn embed(&mut self, sample: &Sample) -> Result<Embedding, RecognizerError> {
        crate::recognizer::check_sample(sample, self.sample_spec())?;

        let raw = sample.to_unit_vector();
        let mean = raw.iter().sum::<f32>() / raw.len() as f32;
        let centered: Vec<f32> = raw.iter().map(|x| x - mean).collect();

        let values = l2_normalize(centered).ok_or_else(|| {
            RecognizerError::InferenceFailed("uniform sample has no pixel embedding".into())
        })?;

        Ok(Embedding {
            values,
            model_version: Some(PIXEL_MODEL_VERSION.to_string()),
        })
    }
}

/// Scale to unit length. `None` for a zero vector.
fn l2_normalize(raw: Vec<f32>) -> Option<Vec<f32>> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        Some(raw.iter().map(|x| x / norm).collect())
    } else {
        None
    }
}

#[cfg(feature = "onnx")]
pub use arcface::ArcFaceEmbedder;

#[cfg(feature = "onnx")]
mod arcface {
    use super::{l2_normalize, FaceEmbedder};
    use crate::preprocess::Sample;
    use crate::recognizer::{check_sample, RecognizerError};
    use crate::types::Embedding;
    use ndarray::Array4;
    use ort::session::Session;
    use ort::value::TensorRef;
    use std::path::Path;

    // --- Named constants ---
    const ARCFACE_INPUT_SIZE: u32 = 112;
    const ARCFACE_MEAN: f32 = 127.5;
    const ARCFACE_STD: f32 = 127.5; // not 128.0: ArcFace normalizes symmetrically
    const ARCFACE_EMBEDDING_DIM: usize = 512;
    const ARCFACE_DEFAULT_THRESHOLD: f32 = 0.40;
    const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

    /// ArcFace-based face embedder.
    pub struct ArcFaceEmbedder {
        session: Session,
    }

    impl ArcFaceEmbedder {
        /// Load the ArcFace ONNX model from the given path.
        pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
            if !Path::new(model_path).exists() {
                return Err(RecognizerError::ModelNotFound(model_path.to_string()));
            }

            let session = Session::builder()?
                .with_intra_threads(2)?
                .commit_from_file(model_path)?;

            tracing::info!(
                path = model_path,
                inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
                outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
                "loaded ArcFace model"
            );

            Ok(Self { session })
        }

        /// Convert a 112×112 RGB sample into a NCHW float tensor.
        pub(super) fn to_tensor(sample: &Sample) -> Array4<f32> {
            let size = ARCFACE_INPUT_SIZE as usize;
            let pixels = sample.pixels();
            let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

            for y in 0..size {
                for x in 0..size {
                    for c in 0..3 {
                        let pixel = pixels[[y, x, c]] as f32;
                        tensor[[0, c, y, x]] = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                    }
                }
            }

            tensor
        }
    }

    impl FaceEmbedder for ArcFaceEmbedder {
        fn input_size(&self) -> u32 {
            ARCFACE_INPUT_SIZE
        }

        fn dimension(&self) -> usize {
            ARCFACE_EMBEDDING_DIM
        }

        fn default_threshold(&self) -> f32 {
            ARCFACE_DEFAULT_THRESHOLD
        }

        fn model_version(&self) -> &str {
            ARCFACE_MODEL_VERSION
        }

        fn embed(&mut self, sample: &Sample) -> Result<Embedding, RecognizerError> {
            check_sample(sample, self.sample_spec())?;
            let input = Self::to_tensor(sample);

            let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

            let raw: Vec<f32> = raw_data.to_vec();

            if raw.len() != ARCFACE_EMBEDDING_DIM {
                return Err(RecognizerError::InferenceFailed(format!(
                    "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                    raw.len()
                )));
            }

            let values = l2_normalize(raw)
                .ok_or_else(|| RecognizerError::InferenceFailed("zero embedding".into()))?;

            Ok(Embedding {
                values,
                model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use ndarray::Array3;

        #[test]
        fn test_tensor_output_shape() {
            let size = ARCFACE_INPUT_SIZE as usize;
            let sample = Sample::from_pixels(Array3::from_elem((size, size, 3), 128u8));
            let tensor = ArcFaceEmbedder::to_tensor(&sample);
            assert_eq!(tensor.shape(), &[1, 3, size, size]);
        }

        #[test]
        fn test_tensor_normalization() {
            let size = ARCFACE_INPUT_SIZE as usize;
            let sample = Sample::from_pixels(Array3::from_elem((size, size, 3), 128u8));
            let tensor = ArcFaceEmbedder::to_tensor(&sample);
            let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
            assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
        }

        #[test]
        fn test_load_missing_model() {
            let err = ArcFaceEmbedder::load("/nonexistent/w600k_r50.onnx").err().unwrap();
            assert!(matches!(err, RecognizerError::ModelNotFound(_)));
        }
    }
}
