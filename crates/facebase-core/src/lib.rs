//! facebase-core: Face identities, image preparation and recognizer backends.
//!
//! Recognizers share one contract ([`recognizer::Recognizer`]) and are chosen
//! at runtime by [`Algorithm`]: LBP histograms, eigenfaces, or face
//! embeddings with a k-nearest-neighbour vote.

pub mod cluster;
pub mod embedder;
pub mod preprocess;
pub mod recognizer;
pub mod sequence;
pub mod types;

pub use embedder::{EmbedderFactory, EmbedderKind, FaceEmbedder, PixelEmbedder};
pub use preprocess::{Preprocessor, Sample, SampleSpec};
pub use recognizer::{Recognizer, RecognizerError};
pub use sequence::{EmptyImages, ImageList, ImageSequence, SimpleTrainingData, TrainingDataProvider};
pub use types::{Algorithm, Attributes, Embedding, Identity, Prediction, TrainingRecord, UNKNOWN_LABEL};
