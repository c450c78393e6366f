//! Embedding recognizer: k-nearest-neighbour vote over a gallery of face
//! embeddings, compared by cosine similarity.

use super::{check_labels, check_sample, Recognizer, RecognizerError};
use crate::embedder::FaceEmbedder;
use crate::preprocess::{Sample, SampleSpec};
use crate::types::{Algorithm, Embedding, Prediction, TrainingRecord};
use std::collections::HashMap;

/// Neighbours consulted when no `k-nearest` parameter is set.
pub const DEFAULT_K_NEAREST: usize = 3;

struct GalleryEntry {
    label: i64,
    embedding: Embedding,
}

pub struct EmbeddingRecognizer {
    embedder: Box<dyn FaceEmbedder>,
    gallery: Vec<GalleryEntry>,
    threshold: f32,
    k_nearest: usize,
}

impl EmbeddingRecognizer {
    pub fn new(embedder: Box<dyn FaceEmbedder>) -> Self {
        let threshold = embedder.default_threshold();
        Self {
            embedder,
            gallery: Vec::new(),
            threshold,
            k_nearest: DEFAULT_K_NEAREST,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn k_nearest(&self) -> usize {
        self.k_nearest
    }

    /// Embed a sample with the configured embedder.
    pub fn embed(&mut self, sample: &Sample) -> Result<Embedding, RecognizerError> {
        self.embedder.embed(sample)
    }
}

impl Recognizer for EmbeddingRecognizer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Embedding
    }

    fn sample_spec(&self) -> SampleSpec {
        self.embedder.sample_spec()
    }

    fn recognize(&mut self, sample: &Sample) -> Result<Prediction, RecognizerError> {
        check_sample(sample, self.sample_spec())?;
        let probe = self.embedder.embed(sample)?;
        Ok(vote(&probe, &self.gallery, self.k_nearest, self.threshold))
    }

    fn train(
        &mut self,
        samples: &[Sample],
        labels: &[i64],
        context: &str,
    ) -> Result<Vec<TrainingRecord>, RecognizerError> {
        check_labels(samples, labels)?;

        // Samples the embedder rejects are skipped one by one.
        let mut embedded = Vec::with_capacity(samples.len());
        let mut last_error = None;
        for (sample, &label) in samples.iter().zip(labels) {
            let embedding = check_sample(sample, self.sample_spec()).and_then(|()| self.embedder.embed(sample));
            match embedding {
                Ok(embedding) => embedded.push((label, embedding)),
                Err(e) => {
                    tracing::warn!(label, error = %e, "embedding: training sample skipped");
                    last_error = Some(e);
                }
            }
        }

        if embedded.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let mut records = Vec::with_capacity(embedded.len());
        for (label, embedding) in embedded {
            records.push(TrainingRecord {
                identity: label,
                context: context.to_string(),
                vector: embedding.values.clone(),
            });
            self.gallery.push(GalleryEntry { label, embedding });
        }
        Ok(records)
    }

    fn set_threshold(&mut self, value: f32) {
        self.threshold = value.clamp(-1.0, 1.0);
    }

    fn set_k_nearest(&mut self, k: usize) {
        self.k_nearest = k.max(1);
    }

    fn restore(&mut self, records: Vec<TrainingRecord>) -> Result<(), RecognizerError> {
        let expected = self.embedder.dimension();
        let version = self.embedder.model_version().to_string();
        let mut skipped = 0usize;

        for record in records {
            if record.vector.len() != expected {
                skipped += 1;
                continue;
            }
            self.gallery.push(GalleryEntry {
                label: record.identity,
                embedding: Embedding {
                    values: record.vector,
                    model_version: Some(version.clone()),
                },
            });
        }

        if skipped > 0 {
            tracing::warn!(
                skipped,
                expected_dim = expected,
                model = %version,
                "embedding: stored vectors from another embedder ignored"
            );
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.gallery.len()
    }
}

/// Majority vote among the `k` most similar gallery entries that reach `threshold`.
///
/// Ties between labels go to the label with the higher best similarity.
/// Every gallery entry is compared; there is no early exit.
fn vote(probe: &Embedding, gallery: &[GalleryEntry], k: usize, threshold: f32) -> Prediction {
    let mut scored: Vec<(i64, f32)> = gallery
        .iter()
        .map(|entry| (entry.label, probe.similarity(&entry.embedding)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let best_similarity = scored.first().map_or(0.0, |&(_, s)| s);

    // label -> (votes, best similarity)
    let mut tally: HashMap<i64, (usize, f32)> = HashMap::new();
    for &(label, similarity) in scored.iter().take(k).filter(|&&(_, s)| s >= threshold) {
        let slot = tally.entry(label).or_insert((0, similarity));
        slot.0 += 1;
        slot.1 = slot.1.max(similarity);
    }

    let winner = tally.into_iter().max_by(|a, b| {
        a.1 .0
            .cmp(&b.1 .0)
            .then(a.1 .1.partial_cmp(&b.1 .1).unwrap_or(std::cmp::Ordering::Equal))
    });

    match winner {
        Some((label, (_, similarity))) => Prediction {
            label,
            confidence: similarity,
        },
        None => Prediction::unknown(best_similarity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::PixelEmbedder;
    use ndarray::Array3;

    fn entry(label: i64, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            label,
            embedding: Embedding { values, model_version: None },
        }
    }

    fn sample(f: impl Fn(usize, usize) -> u8) -> Sample {
        Sample::from_pixels(Array3::from_shape_fn((32, 32, 3), |(y, x, _)| f(y, x)))
    }

    #[test]
    fn test_vote_majority_wins() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let gallery = vec![
            entry(1, vec![1.0, 0.0]),
            entry(2, vec![0.95, 0.05]),
            entry(2, vec![0.9, 0.1]),
        ];
        let p = vote(&probe, &gallery, 3, 0.5);
        assert_eq!(p.label, 2);
    }

    #[test]
    fn test_vote_k_one_takes_nearest() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let gallery = vec![
            entry(2, vec![0.9, 0.1]),
            entry(1, vec![1.0, 0.0]),
            entry(2, vec![0.95, 0.05]),
        ];
        let p = vote(&probe, &gallery, 1, 0.5);
        assert_eq!(p.label, 1);
        assert!((p.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vote_below_threshold_is_unknown() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let gallery = vec![entry(1, vec![0.0, 1.0])];
        let p = vote(&probe, &gallery, 3, 0.5);
        assert!(!p.is_known());
        assert!(p.confidence.abs() < 1e-6);
    }

    #[test]
    fn test_vote_empty_gallery() {
        let probe = Embedding { values: vec![1.0], model_version: None };
        assert!(!vote(&probe, &[], 3, 0.5).is_known());
    }

    #[test]
    fn test_train_then_recognize() {
        let mut r = EmbeddingRecognizer::new(Box::new(PixelEmbedder));
        let horizontal = sample(|_, x| (x * 8) as u8);
        let vertical = sample(|y, _| (y * 8) as u8);
        r.train(&[horizontal.clone(), vertical.clone()], &[4, 5], "ctx").unwrap();

        assert_eq!(r.recognize(&horizontal).unwrap().label, 4);
        assert_eq!(r.recognize(&vertical).unwrap().label, 5);
    }

    #[test]
    fn test_train_skips_rejected_samples() {
        let mut r = EmbeddingRecognizer::new(Box::new(PixelEmbedder));
        let horizontal = sample(|_, x| (x * 8) as u8);
        let uniform = sample(|_, _| 0);

        let records = r.train(&[horizontal.clone(), uniform.clone()], &[4, 4], "ctx").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(r.len(), 1);
        assert_eq!(r.recognize(&horizontal).unwrap().label, 4);

        assert!(r.train(&[uniform], &[5], "ctx").is_err());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_unrelated_probe_is_unknown() {
        let mut r = EmbeddingRecognizer::new(Box::new(PixelEmbedder));
        r.train(&[sample(|_, x| (x * 8) as u8)], &[4], "ctx").unwrap();
        let checker = sample(|y, x| if (x / 4 + y / 4) % 2 == 0 { 10 } else { 240 });
        assert!(!r.recognize(&checker).unwrap().is_known());
    }

    #[test]
    fn test_restore_skips_foreign_dimension() {
        let mut r = EmbeddingRecognizer::new(Box::new(PixelEmbedder));
        let records = vec![
            TrainingRecord { identity: 1, context: "a".into(), vector: vec![0.5; 512] },
            TrainingRecord { identity: 2, context: "a".into(), vector: vec![0.1; 32 * 32 * 3] },
        ];
        r.restore(records).unwrap();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_parameters_are_clamped() {
        let mut r = EmbeddingRecognizer::new(Box::new(PixelEmbedder));
        r.set_k_nearest(0);
        r.set_threshold(3.0);
        assert_eq!(r.k_nearest(), 1);
        assert_eq!(r.threshold(), 1.0);
    }
}
