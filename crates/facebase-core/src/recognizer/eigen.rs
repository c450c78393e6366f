//! Principal component ("eigenface") recognizer.
//!
//! Training vectors are 64×64 grayscale samples scaled to [0, 1]. The face
//! space is spanned by the principal components of the stored vectors,
//! computed through the small Gram matrix and a cyclic Jacobi
//! eigen-decomposition. A probe is labelled with its nearest stored vector in
//! face space; probes far from face space are rejected outright.

use super::{check_labels, check_sample, distance_bound, Recognizer, RecognizerError};
use crate::preprocess::{Sample, SampleSpec};
use crate::types::{Algorithm, Prediction, TrainingRecord};
use ndarray::{aview1, Array1, Array2, Axis};

// --- Named constants ---
const EIGEN_SAMPLE_SIZE: u32 = 64;
const EIGEN_VECTOR_LEN: usize = (EIGEN_SAMPLE_SIZE * EIGEN_SAMPLE_SIZE) as usize;
const MAX_COMPONENTS: usize = 80;
const DEFAULT_ACCURACY: f32 = 0.7;
const JACOBI_MAX_SWEEPS: usize = 64;
const EIGENVALUE_EPSILON: f64 = 1e-9;

struct FaceSpace {
    mean: Array1<f32>,
    /// One unit-length component per row.
    components: Array2<f32>,
    /// Projection of every stored vector, one row per entry.
    projections: Array2<f32>,
}

pub struct EigenRecognizer {
    labels: Vec<i64>,
    vectors: Vec<Vec<f32>>,
    space: Option<FaceSpace>,
    max_distance: f32,
}

impl EigenRecognizer {
    pub fn new() -> Self {
        Self {
            labels: Vec::new(),
            vectors: Vec::new(),
            space: None,
            max_distance: distance_bound(DEFAULT_ACCURACY),
        }
    }

    fn spec() -> SampleSpec {
        SampleSpec::gray(EIGEN_SAMPLE_SIZE)
    }

    fn rebuild(&mut self) {
        self.space = if self.vectors.is_empty() {
            None
        } else {
            Some(FaceSpace::compute(&self.vectors))
        };
        tracing::debug!(
            vectors = self.vectors.len(),
            components = self.space.as_ref().map_or(0, |s| s.components.nrows()),
            "eigen: face space rebuilt"
        );
    }
}

impl Default for EigenRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceSpace {
    fn compute(vectors: &[Vec<f32>]) -> Self {
        let n = vectors.len();
        let d = vectors[0].len();

        let mut data = Array2::<f32>::zeros((n, d));
        for (i, v) in vectors.iter().enumerate() {
            data.row_mut(i).assign(&aview1(v));
        }
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let centered = &data - &mean;

        // Gram trick: eigenvectors of X·Xᵀ (n×n) map to components Xᵀ·v / sqrt(λ).
        let centered64 = centered.mapv(f64::from);
        let gram = centered64.dot(&centered64.t());
        let (values, vectors64) = jacobi_eigen(gram);

        let mut order: Vec<usize> = (0..n).filter(|&i| values[i] > EIGENVALUE_EPSILON).collect();
        order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(std::cmp::Ordering::Equal));
        order.truncate(MAX_COMPONENTS);

        let mut components = Array2::<f32>::zeros((order.len(), d));
        for (row, &i) in order.iter().enumerate() {
            let coeffs = vectors64.column(i);
            let component = centered64.t().dot(&coeffs) / values[i].sqrt();
            components.row_mut(row).assign(&component.mapv(|x| x as f32));
        }

        let projections = centered.dot(&components.t());
        Self {
            mean,
            components,
            projections,
        }
    }

    fn project(&self, vector: &Array1<f32>) -> (Array1<f32>, f32) {
        let centered = vector - &self.mean;
        let projection = self.components.dot(&centered);
        let total: f32 = centered.iter().map(|x| x * x).sum();
        let inside: f32 = projection.iter().map(|x| x * x).sum();
        // Squared distance from face space.
        (projection, (total - inside).max(0.0))
    }
}

impl Recognizer for EigenRecognizer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Eigen
    }

    fn sample_spec(&self) -> SampleSpec {
        Self::spec()
    }

    fn recognize(&mut self, sample: &Sample) -> Result<Prediction, RecognizerError> {
        check_sample(sample, Self::spec())?;
        let Some(space) = &self.space else {
            return Ok(Prediction::unknown(1.0));
        };

        let probe = Array1::from_vec(sample.to_unit_vector());
        let (projection, residual) = space.project(&probe);
        let scale = EIGEN_VECTOR_LEN as f32;
        let residual = (residual / scale).sqrt();

        let mut best: Option<(usize, f32)> = None;
        for (i, row) in space.projections.rows().into_iter().enumerate() {
            let d: f32 = row
                .iter()
                .zip(projection.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>();
            let d = (d / scale).sqrt();
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        Ok(match best {
            Some((i, distance)) if distance < self.max_distance && residual < self.max_distance => {
                Prediction {
                    label: self.labels[i],
                    confidence: distance,
                }
            }
            Some((_, distance)) => Prediction::unknown(distance.max(residual)),
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
            let vector = sample.to_unit_vector();
            records.push(TrainingRecord {
                identity: label,
                context: context.to_string(),
                vector: vector.clone(),
            });
            self.labels.push(label);
            self.vectors.push(vector);
        }
        self.rebuild();
        Ok(records)
    }

    fn set_threshold(&mut self, value: f32) {
        self.max_distance = distance_bound(value);
    }

    fn restore(&mut self, records: Vec<TrainingRecord>) -> Result<(), RecognizerError> {
        for record in records {
            if record.vector.len() != EIGEN_VECTOR_LEN {
                return Err(RecognizerError::VectorLength {
                    expected: EIGEN_VECTOR_LEN,
                    actual: record.vector.len(),
                });
            }
            self.labels.push(record.identity);
            self.vectors.push(record.vector);
        }
        self.rebuild();
        Ok(())
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns the eigenvalues and a matrix whose columns are the matching
/// unit eigenvectors.
fn jacobi_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| (0..n).filter(move |&q| q != p).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]].powi(2))
            .sum();
        if off < 1e-18 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[[i, i]]).collect();
    (values, v)
}
