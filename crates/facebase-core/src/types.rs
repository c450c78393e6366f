use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attribute key holding an identity's immutable UUID.
pub const UUID_KEY: &str = "uuid";
/// Attribute key for a person's full name. Second in lookup priority.
pub const FULL_NAME_KEY: &str = "fullName";
/// Attribute key for a person's short name. Third in lookup priority.
pub const NAME_KEY: &str = "name";

/// Label reported by a recognizer when the probe is outside its acceptance bound.
pub const UNKNOWN_LABEL: i64 = -1;

/// Ordered attribute pairs of an identity. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Exact (key, value) pair lookup. Other values of the same key do not matter.
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|(k, v)| k == key && v == value)
    }

    /// Append a pair, keeping any existing values of the key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Replace every value of `key` with a single pair appended at the end.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove(&key);
        self.0.push((key, value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| k != key);
    }

    /// Append every pair of `other`.
    pub fn merge(&mut self, other: &Attributes) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Distinct keys in first-appearance order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (k, _) in &self.0 {
            if !keys.contains(&k.as_str()) {
                keys.push(k);
            }
        }
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A person known to the engine.
///
/// The id is assigned by the database at creation. The UUID lives in the
/// attributes under [`UUID_KEY`] and never changes once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub attributes: Attributes,
}

impl Identity {
    pub fn new(id: i64, attributes: Attributes) -> Self {
        Self { id, attributes }
    }

    pub fn uuid(&self) -> Option<&str> {
        self.attributes.get(UUID_KEY)
    }
}

/// Recognition algorithm family. Exactly one is active per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Local binary pattern histograms.
    Histogram,
    /// Principal component projection.
    Eigen,
    /// Linear discriminant projection. No backend is compiled for it.
    Fisher,
    /// Neural face embeddings with k-nearest-neighbour vote.
    Embedding,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Histogram,
        Algorithm::Eigen,
        Algorithm::Fisher,
        Algorithm::Embedding,
    ];

    /// Stable name used for persisted models and diagnostics.
    pub fn identifier(self) -> &'static str {
        match self {
            Algorithm::Histogram => "histogram",
            Algorithm::Eigen => "eigen",
            Algorithm::Fisher => "fisher",
            Algorithm::Embedding => "embedding",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown algorithm: {0} (expected histogram, eigen, fisher or embedding)")]
pub struct ParseAlgorithmError(String);

impl FromStr for Algorithm {
    type Err = ParseAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "histogram" | "lbph" => Ok(Algorithm::Histogram),
            "eigen" | "eigenfaces" => Ok(Algorithm::Eigen),
            "fisher" | "fisherfaces" => Ok(Algorithm::Fisher),
            "embedding" | "dnn" => Ok(Algorithm::Embedding),
            other => Err(ParseAlgorithmError(other.to_string())),
        }
    }
}

/// Label predicted by a recognizer together with its raw confidence.
///
/// The meaning of `confidence` is recognizer-specific: a distance for the
/// histogram and eigen recognizers, a cosine similarity for embeddings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i64,
    pub confidence: f32,
}

impl Prediction {
    pub fn unknown(confidence: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL,
            confidence,
        }
    }

    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

/// One trained sample as handed to the database: the identity it belongs to,
/// the training context it was produced under, and the recognizer's vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub identity: i64,
    pub context: String,
    pub vector: Vec<f32>,
}

/// Face embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_duplicate_keys() {
        let mut attrs = Attributes::new();
        attrs.push("name", "Ann");
        attrs.push("name", "Annie");
        attrs.push("city", "Oslo");

        assert_eq!(attrs.get("name"), Some("Ann"));
        assert_eq!(attrs.get_all("name").collect::<Vec<_>>(), vec!["Ann", "Annie"]);
        assert!(attrs.contains("name", "Annie"));
        assert!(!attrs.contains("city", "Annie"));
        assert_eq!(attrs.keys(), vec!["name", "city"]);
    }

    #[test]
    fn test_attributes_set_replaces_all_values() {
        let mut attrs: Attributes = [("uuid", "a"), ("name", "x"), ("uuid", "b")]
            .into_iter()
            .collect();
        attrs.set("uuid", "c");
        assert_eq!(attrs.get_all("uuid").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_attributes_merge_appends() {
        let mut a: Attributes = [("name", "Ann")].into_iter().collect();
        let b: Attributes = [("name", "Ann"), ("tag", "family")].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.len(), 3);
        assert!(a.contains("tag", "family"));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("LBPH".parse::<Algorithm>().unwrap(), Algorithm::Histogram);
        assert_eq!("embedding".parse::<Algorithm>().unwrap(), Algorithm::Embedding);
        assert!("kmeans".parse::<Algorithm>().is_err());
        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.identifier().parse::<Algorithm>().unwrap(), algorithm);
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![0.0, 1.0], model_version: None };
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0], model_version: None };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_prediction_unknown() {
        let p = Prediction::unknown(0.3);
        assert!(!p.is_known());
        assert_eq!(p.label, UNKNOWN_LABEL);
    }
}
