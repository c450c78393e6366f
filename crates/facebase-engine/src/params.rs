//! Tunable recognizer settings.

use facebase_core::{Algorithm, Recognizer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Acceptance bound as a 0–1 value. Takes precedence over [`ACCURACY`].
pub const THRESHOLD: &str = "threshold";
/// Acceptance bound as a 0–1 value.
pub const ACCURACY: &str = "accuracy";
/// Neighbours consulted by the embedding recognizer.
pub const K_NEAREST: &str = "k-nearest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ParamValue::Int(i) => Some(*i as f32),
            ParamValue::Float(f) => Some(*f as f32),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Positive whole number, if the value is one.
    pub fn as_count(&self) -> Option<usize> {
        match self {
            ParamValue::Int(i) if *i > 0 => Some(*i as usize),
            ParamValue::Float(f) if *f >= 1.0 && f.fract() == 0.0 => Some(*f as usize),
            ParamValue::Text(s) => s.trim().parse().ok().filter(|&k: &usize| k > 0),
            _ => None,
        }
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Raw option mapping. Unrecognized keys are kept but have no effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn extend(&mut self, other: Parameters) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The acceptance bound, `threshold` first, then `accuracy`.
    pub fn threshold(&self) -> Option<f32> {
        self.get(THRESHOLD)
            .and_then(ParamValue::as_f32)
            .or_else(|| self.get(ACCURACY).and_then(ParamValue::as_f32))
    }

    pub fn k_nearest(&self) -> Option<usize> {
        self.get(K_NEAREST).and_then(ParamValue::as_count)
    }

    /// Push every recognized key into `backend`. Absent keys leave the
    /// backend's built-in defaults alone.
    pub fn apply(&self, backend: &mut dyn Recognizer) {
        let threshold = self.threshold();
        if let Some(value) = threshold {
            backend.set_threshold(value);
        }

        let k_nearest = match backend.algorithm() {
            Algorithm::Embedding => self.k_nearest(),
            _ => None,
        };
        if let Some(k) = k_nearest {
            backend.set_k_nearest(k);
        }

        tracing::debug!(
            algorithm = %backend.algorithm(),
            threshold = ?threshold,
            k_nearest = ?k_nearest,
            "parameters applied"
        );
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
