use crate::params::{Parameters, K_NEAREST, THRESHOLD};
use facebase_core::types::ParseAlgorithmError;
use facebase_core::{Algorithm, EmbedderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("FACEBASE_ALGORITHM: {0}")]
    Algorithm(#[from] ParseAlgorithmError),
}

/// Which embedder backs the embedding recognizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderChoice {
    #[default]
    Pixel,
    Arcface,
}

/// Engine configuration: TOML file values overridden by `FACEBASE_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Recognition algorithm selected at startup.
    pub algorithm: Algorithm,
    pub embedder: EmbedderChoice,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Initial `threshold` parameter. Unset keeps each recognizer's default.
    pub threshold: Option<f32>,
    /// Initial `k-nearest` parameter.
    pub k_nearest: Option<usize>,
    /// Demote eigen and fisher selections to histogram.
    pub embedding_capable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("faces.db"),
            algorithm: Algorithm::Histogram,
            embedder: EmbedderChoice::Pixel,
            model_dir: data_dir.join("models"),
            threshold: None,
            k_nearest: None,
            embedding_capable: true,
        }
    }
}

impl EngineConfig {
    /// Load `path` when given (defaults otherwise), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text)?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Override fields from `FACEBASE_*` variables looked up through `var`.
    /// Unparseable numbers keep the current value.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("FACEBASE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("FACEBASE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEBASE_ALGORITHM") {
            self.algorithm = v.parse()?;
        }
        if let Some(v) = var("FACEBASE_EMBEDDER") {
            match v.trim().to_ascii_lowercase().as_str() {
                "pixel" => self.embedder = EmbedderChoice::Pixel,
                "arcface" => self.embedder = EmbedderChoice::Arcface,
                other => tracing::warn!(value = other, "FACEBASE_EMBEDDER ignored"),
            }
        }
        if let Some(v) = parsed(&var, "FACEBASE_THRESHOLD") {
            self.threshold = Some(v);
        }
        if let Some(v) = parsed(&var, "FACEBASE_K_NEAREST") {
            self.k_nearest = Some(v);
        }
        if let Some(v) = var("FACEBASE_EMBEDDING_CAPABLE") {
            self.embedding_capable = v != "0";
        }
        Ok(())
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }

    pub fn embedder_kind(&self) -> EmbedderKind {
        match self.embedder {
            EmbedderChoice::Pixel => EmbedderKind::Pixel,
            EmbedderChoice::Arcface => EmbedderKind::ArcFace {
                model_path: self.arcface_model_path(),
            },
        }
    }

    pub fn parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        if let Some(threshold) = self.threshold {
            params.insert(THRESHOLD, threshold);
        }
        if let Some(k) = self.k_nearest {
            params.insert(K_NEAREST, k);
        }
        params
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facebase")
}
