//! Local binary pattern histogram recognizer.
//!
//! Each 64×64 grayscale sample is turned into LBP(1, 8) codes, histogrammed
//! per cell of an 8×8 grid. A probe is labelled with its nearest stored
//! histogram under a normalized chi-square distance.

use super::{check_labels, check_sample, distance_bound, Recognizer, RecognizerError};
use crate::preprocess::{Sample, SampleSpec};
use crate::types::{Algorithm, Prediction, TrainingRecord};

// --- Named constants ---
const HISTOGRAM_SAMPLE_SIZE: u32 = 64;
const LBP_GRID: usize = 8;
const LBP_BINS: usize = 256;
const HISTOGRAM_LEN: usize = LBP_GRID * LBP_GRID * LBP_BINS;
/// Accuracy used until a threshold parameter is applied.
const DEFAULT_ACCURACY: f32 = 0.7;

/// Neighbour offsets (dy, dx), clockwise from the top-left corner.
const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
];

struct HistogramEntry {
    label: i64,
    histogram: Vec<f32>,
}

pub struct HistogramRecognizer {
    entries: Vec<HistogramEntry>,
    max_distance: f32,
}

impl HistogramRecognizer {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_distance: distance_bound(DEFAULT_ACCURACY),
        }
    }

    fn spec() -> SampleSpec {
        SampleSpec::gray(HISTOGRAM_SAMPLE_SIZE)
    }
}

impl Default for HistogramRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer for HistogramRecognizer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Histogram
    }

    fn sample_spec(&self) -> SampleSpec {
        Self::spec()
    }

    fn recognize(&mut self, sample: &Sample) -> Result<Prediction, RecognizerError> {
        check_sample(sample, Self::spec())?;
        let probe = lbp_histogram(sample);

        let mut best: Option<(i64, f32)> = None;
        for entry in &self.entries {
            let d = chi_square_distance(&probe, &entry.histogram);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((entry.label, d));
            }
        }

        Ok(match best {
            Some((label, distance)) if distance < self.max_distance => Prediction {
                label,
                confidence: distance,
            },
            Some((_, distance)) => Prediction::unknown(distance),
            None => Prediction::unknown(1.0),
        })
    }

    fn train(
        &mut self,
        samples: &[Sample],
        labels: &[i64],
        context: &str,
    ) -> Result<Vec<TrainingRecord>, RecognizerError> {
        check_labels(samples, labels)?;
        for sample in samples {
            check_sample(sample, Self::spec())?;
        }

        let mut records = Vec::with_capacity(samples.len());
        for (sample, &label) in samples.iter().zip(labels) {
            let histogram = lbp_histogram(sample);
            records.push(TrainingRecord {
                identity: label,
                context: context.to_string(),
                vector: histogram.clone(),
            });
            self.entries.push(HistogramEntry { label, histogram });
        }
        Ok(records)
    }

    fn set_threshold(&mut self, value: f32) {
        self.max_distance = distance_bound(value);
    }

    fn restore(&mut self, records: Vec<TrainingRecord>) -> Result<(), RecognizerError> {
        for record in records {
            if record.vector.len() != HISTOGRAM_LEN {
                return Err(RecognizerError::VectorLength {
                    expected: HISTOGRAM_LEN,
                    actual: record.vector.len(),
                });
            }
            self.entries.push(HistogramEntry {
                label: record.identity,
                histogram: record.vector,
            });
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-cell normalized LBP histograms, concatenated cell by cell.
fn lbp_histogram(sample: &Sample) -> Vec<f32> {
    let pixels = sample.pixels();
    let h = sample.height();
    let w = sample.width();
    let mut hist = vec![0.0f32; HISTOGRAM_LEN];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = pixels[[y, x, 0]];
            let mut code = 0usize;
            for (bit, &(dy, dx)) in NEIGHBOURS.iter().enumerate() {
                let ny = (y as isize + dy) as usize;
                let nx = (x as isize + dx) as usize;
                if pixels[[ny, nx, 0]] >= center {
                    code |= 1 << bit;
                }
            }
            let cell = (y * LBP_GRID / h) * LBP_GRID + (x * LBP_GRID / w);
            hist[cell * LBP_BINS + code] += 1.0;
        }
    }

    for cell in hist.chunks_mut(LBP_BINS) {
        let total: f32 = cell.iter().sum();
        if total > 0.0 {
            cell.iter_mut().for_each(|v| *v /= total);
        }
    }
    hist
}

/// Chi-square distance between two cell-normalized histograms, scaled to [0, 1].
fn chi_square_distance(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a
        .iter()
        .zip(b)
        .map(|(&p, &q)| {
            let s = p + q;
            if s > 0.0 { (p - q).powi(2) / s } else { 0.0 }
        })
        .sum();
    // Each cell contributes at most 2.
    sum / (2.0 * (LBP_GRID * LBP_GRID) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Preprocessor;
    use image::{DynamicImage, GrayImage, Luma};

    fn sample_from(f: impl Fn(u32, u32) -> u8) -> Sample {
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([f(x, y)]));
        Preprocessor::new(HistogramRecognizer::spec()).prepare(&DynamicImage::ImageLuma8(img))
    }

    fn horizontal() -> Sample {
        sample_from(|x, _| (x * 4) as u8)
    }

    fn vertical() -> Sample {
        sample_from(|_, y| (y * 4) as u8)
    }

    fn checkerboard() -> Sample {
        sample_from(|x, y| if (x / 8 + y / 8) % 2 == 0 { 20 } else { 230 })
    }

    #[test]
    fn test_histogram_cells_normalized() {
        let hist = lbp_histogram(&horizontal());
        assert_eq!(hist.len(), HISTOGRAM_LEN);
        for cell in hist.chunks(LBP_BINS) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell sums to {total}");
        }
    }

    #[test]
    fn test_chi_square_bounds() {
        let a = lbp_histogram(&horizontal());
        let b = lbp_histogram(&checkerboard());
        assert!(chi_square_distance(&a, &a).abs() < 1e-6);
        let d = chi_square_distance(&a, &b);
        assert!(d > 0.5 && d <= 1.0, "distance {d}");
    }

    #[test]
    fn test_recognize_trained_label() {
        let mut r = HistogramRecognizer::new();
        r.train(&[horizontal(), vertical()], &[7, 8], "ctx").unwrap();

        assert_eq!(r.recognize(&horizontal()).unwrap().label, 7);
        assert_eq!(r.recognize(&vertical()).unwrap().label, 8);
    }

    #[test]
    fn test_recognize_unrelated_is_unknown() {
        let mut r = HistogramRecognizer::new();
        r.train(&[horizontal()], &[7], "ctx").unwrap();
        let p = r.recognize(&checkerboard()).unwrap();
        assert!(!p.is_known(), "unexpected match {p:?}");
    }

    #[test]
    fn test_recognize_empty_model_is_unknown() {
        let mut r = HistogramRecognizer::new();
        assert!(!r.recognize(&horizontal()).unwrap().is_known());
    }

    #[test]
    fn test_threshold_controls_acceptance() {
        // Left half matches the trained gradient, right half does not.
        let half = sample_from(|x, y| if x < 32 { (x * 4) as u8 } else { (y * 4) as u8 });
        let mut r = HistogramRecognizer::new();
        r.train(&[horizontal()], &[7], "ctx").unwrap();

        let strict = r.recognize(&half).unwrap();
        assert!(!strict.is_known(), "default bound accepted {strict:?}");

        r.set_threshold(0.0);
        let lenient = r.recognize(&half).unwrap();
        assert_eq!(lenient.label, 7);
        assert!(lenient.confidence < 1.0);
    }

    #[test]
    fn test_recognize_rejects_wrong_layout() {
        let mut r = HistogramRecognizer::new();
        assert!(r.recognize(&Sample::empty()).is_err());
    }

    #[test]
    fn test_train_records_round_into_restore() {
        let mut r = HistogramRecognizer::new();
        let records = r.train(&[horizontal()], &[3], "import").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context, "import");

        let mut restored = HistogramRecognizer::new();
        restored.restore(records).unwrap();
        assert_eq!(restored.recognize(&horizontal()).unwrap().label, 3);
    }

    #[test]
    fn test_restore_rejects_bad_length() {
        let mut r = HistogramRecognizer::new();
        let bad = TrainingRecord { identity: 1, context: String::new(), vector: vec![0.0; 3] };
        assert!(matches!(r.restore(vec![bad]), Err(RecognizerError::VectorLength { .. })));
    }

    #[test]
    fn test_train_label_mismatch() {
        let mut r = HistogramRecognizer::new();
        assert!(r.train(&[horizontal()], &[], "ctx").is_err());
    }
}
