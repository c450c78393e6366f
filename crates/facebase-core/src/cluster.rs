//! Density-based clustering (DBSCAN) of face embeddings.

use crate::types::Embedding;

/// Minimum neighbourhood size for a core point.
pub const DEFAULT_MIN_POINTS: usize = 3;

/// Group embeddings whose cosine similarity is at least `min_similarity`.
///
/// Returns one entry per input: `Some(cluster)` with clusters numbered from 0
/// in discovery order, or `None` for noise.
pub fn dbscan(embeddings: &[Embedding], min_similarity: f32, min_points: usize) -> Vec<Option<usize>> {
    let n = embeddings.len();
    let neighbours = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| embeddings[i].similarity(&embeddings[j]) >= min_similarity)
            .collect()
    };

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0usize;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seeds = neighbours(i);
        if seeds.len() < min_points {
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut queue = seeds;
        while let Some(j) = queue.pop() {
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let expansion = neighbours(j);
            if expansion.len() >= min_points {
                queue.extend(expansion);
            }
        }
    }

    tracing::debug!(points = n, clusters = next_cluster, "dbscan finished");
    labels
}
