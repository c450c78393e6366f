//! facebase-engine: Identity directory, training and recognition behind one
//! reentrant lock.
//!
//! [`FaceEngine`] is the entry point. It owns the identity cache, the single
//! active recognizer backend and the [`FaceDb`](facebase_db::FaceDb) they are
//! persisted to.

pub mod config;
pub mod engine;
mod identity_store;
pub mod params;
mod recognition;
pub mod training;

pub use config::{ConfigError, EmbedderChoice, EngineConfig};
pub use engine::{EngineOptions, FaceEngine, TrainingCostHint};
pub use params::{ParamValue, Parameters};
pub use training::TrainingReport;
