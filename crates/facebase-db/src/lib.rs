//! facebase-db: Durable storage for identities and trained recognizer models.
//!
//! [`FaceDb`] is the contract the engine consumes; [`SqliteFaceDb`] implements
//! it on a single SQLite file.

pub mod sqlite;

pub use sqlite::SqliteFaceDb;

use chrono::{DateTime, Utc};
use facebase_core::{Algorithm, Attributes, Identity, TrainingRecord};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored vector is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp {0:?} in database")]
    Timestamp(String),
}

/// Identity and model persistence consumed by the engine.
///
/// Training data is scoped per [`Algorithm`]. A `None` context addresses every
/// context, `Some(c)` only records tagged `c`.
pub trait FaceDb: Send {
    /// Readiness probe consulted once when the engine is constructed.
    fn check_ready(&self) -> bool;

    fn identities(&self) -> Result<Vec<Identity>, DbError>;

    /// Create an identity carrying `attributes` and return its id. The row
    /// and its attributes are written together or not at all.
    fn add_identity(&self, attributes: &Attributes) -> Result<i64, DbError>;

    /// Replace the stored attributes of `identity`.
    fn update_identity(&self, identity: &Identity) -> Result<(), DbError>;

    /// Remove an identity with its attributes and training data.
    fn delete_identity(&self, id: i64) -> Result<(), DbError>;

    /// Append trained records to the model of `algorithm`.
    fn save_training(&self, algorithm: Algorithm, records: &[TrainingRecord]) -> Result<(), DbError>;

    /// Every stored record of `algorithm`, oldest first.
    fn training(&self, algorithm: Algorithm) -> Result<Vec<TrainingRecord>, DbError>;

    /// When the model of `algorithm` was last saved, if ever.
    fn training_updated_at(&self, algorithm: Algorithm) -> Result<Option<DateTime<Utc>>, DbError>;

    fn clear_training(&self, algorithm: Algorithm, context: Option<&str>) -> Result<(), DbError>;

    fn clear_training_for(
        &self,
        algorithm: Algorithm,
        identities: &[i64],
        context: Option<&str>,
    ) -> Result<(), DbError>;

    fn integrity_check(&self) -> Result<bool, DbError>;

    fn vacuum(&self) -> Result<(), DbError>;
}
