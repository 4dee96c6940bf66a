//! Embedding clustering.
//!
//! The engine partitions face embeddings with a pluggable [`Clusterer`].
//! Two strategies ship: density-based DBSCAN over cosine distance, and
//! k-means with deterministic, seeded k-means++ initialisation.

use crate::types::{Embedding, FaceRecord, NOISE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use thiserror::Error;

pub const DEFAULT_EPS: f32 = 0.5;
pub const DEFAULT_MIN_SAMPLES: usize = 3;
pub const DEFAULT_N_CLUSTERS: usize = 10;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_ITERATIONS: usize = 300;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("embedding {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Strategy that turns embeddings into integer cluster labels.
///
/// The returned vector has one label per input, in input order; [`NOISE`]
/// marks points that belong to no cluster. Implementations hold no state
/// between calls.
pub trait Clusterer {
    fn name(&self) -> &'static str;
    fn fit(&self, embeddings: &[Embedding]) -> Result<Vec<i32>, ClusterError>;
}

/// Validated clustering strategy selection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterMethod {
    Dbscan { eps: f32, min_samples: usize },
    KMeans { k: usize, seed: u64, max_iterations: usize },
}

impl ClusterMethod {
    /// Build a method from its configuration name and parameters.
    ///
    /// Fails before any work is done if the name is unknown or a parameter
    /// is out of range.
    pub fn from_params(
        method: &str,
        eps: f32,
        min_samples: usize,
        n_clusters: usize,
        seed: u64,
        max_iterations: usize,
    ) -> Result<Self, ClusterError> {
        let method = match method.trim().to_ascii_lowercase().as_str() {
            "dbscan" => ClusterMethod::Dbscan { eps, min_samples },
            "kmeans" | "k-means" => ClusterMethod::KMeans {
                k: n_clusters,
                seed,
                max_iterations,
            },
            other => {
                return Err(ClusterError::Configuration(format!(
                    "unknown clustering method: {other:?} (expected \"dbscan\" or \"kmeans\")"
                )))
            }
        };
        method.validate()?;
        Ok(method)
    }

    fn validate(&self) -> Result<(), ClusterError> {
        match *self {
            ClusterMethod::Dbscan { eps, min_samples } => {
                if !eps.is_finite() || eps <= 0.0 {
                    return Err(ClusterError::Configuration(format!(
                        "eps must be a positive number, got {eps}"
                    )));
                }
                if min_samples == 0 {
                    return Err(ClusterError::Configuration(
                        "min_samples must be at least 1".into(),
                    ));
                }
            }
            ClusterMethod::KMeans { k, max_iterations, .. } => {
                if k == 0 {
                    return Err(ClusterError::Configuration(
                        "n_clusters must be at least 1".into(),
                    ));
                }
                if max_iterations == 0 {
                    return Err(ClusterError::Configuration(
                        "max_iterations must be at least 1".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Instantiate the strategy.
    pub fn clusterer(&self) -> Box<dyn Clusterer> {
        match *self {
            ClusterMethod::Dbscan { eps, min_samples } => Box::new(Dbscan { eps, min_samples }),
            ClusterMethod::KMeans { k, seed, max_iterations } => Box::new(KMeans {
                k,
                seed,
                max_iterations,
            }),
        }
    }
}

/// Outcome counts of one clustering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusteringStats {
    pub clusters: usize,
    pub noise: usize,
}

/// Run `clusterer` over `faces` and write each face's assignment in place.
///
/// An empty slice is not an error: nothing is assigned and zero clusters
/// are reported.
pub fn cluster_faces(
    faces: &mut [FaceRecord],
    clusterer: &dyn Clusterer,
) -> Result<ClusteringStats, ClusterError> {
    if faces.is_empty() {
        tracing::warn!("no faces to cluster");
        return Ok(ClusteringStats { clusters: 0, noise: 0 });
    }

    let embeddings: Vec<Embedding> = faces.iter().map(|f| f.embedding.clone()).collect();
    check_dimensions(&embeddings)?;

    let labels = clusterer.fit(&embeddings)?;
    for (face, label) in faces.iter_mut().zip(labels.iter()) {
        face.cluster_id = Some(*label);
    }

    let clusters = labels
        .iter()
        .filter(|&&l| l != NOISE)
        .collect::<BTreeSet<_>>()
        .len();
    let noise = labels.iter().filter(|&&l| l == NOISE).count();

    tracing::info!(
        method = clusterer.name(),
        faces = faces.len(),
        clusters,
        noise,
        "clustering complete"
    );

    Ok(ClusteringStats { clusters, noise })
}

fn check_dimensions(embeddings: &[Embedding]) -> Result<(), ClusterError> {
    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    let expected = first.dim();
    for (index, e) in embeddings.iter().enumerate() {
        if e.dim() != expected {
            return Err(ClusterError::DimensionMismatch {
                index,
                expected,
                actual: e.dim(),
            });
        }
    }
    Ok(())
}

/// Symmetric pairwise cosine distance matrix.
pub fn cosine_distance_matrix(embeddings: &[Embedding]) -> Vec<Vec<f32>> {
    let n = embeddings.len();
    let mut matrix = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = embeddings[i].cosine_distance(&embeddings[j]).max(0.0);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

/// DBSCAN over cosine distance.
///
/// A point is a core point when at least `min_samples` points (itself
/// included) lie within `eps`. Clusters are numbered from 0 in the order
/// their first core point appears in the input; border points keep the
/// first cluster that reaches them.
pub struct Dbscan {
    pub eps: f32,
    pub min_samples: usize,
}

impl Clusterer for Dbscan {
    fn name(&self) -> &'static str {
        "dbscan"
    }

    fn fit(&self, embeddings: &[Embedding]) -> Result<Vec<i32>, ClusterError> {
        let n = embeddings.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let distances = cosine_distance_matrix(embeddings);
        let neighbors: Vec<Vec<usize>> = distances
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, &d)| d <= self.eps)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        let is_core: Vec<bool> = neighbors
            .iter()
            .map(|nb| nb.len() >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<i32>> = vec![None; n];
        let mut current: i32 = 0;

        for seed in 0..n {
            if labels[seed].is_some() || !is_core[seed] {
                continue;
            }

            labels[seed] = Some(current);
            let mut stack = vec![seed];
            while let Some(point) = stack.pop() {
                for &j in &neighbors[point] {
                    if labels[j].is_some() {
                        continue;
                    }
                    labels[j] = Some(current);
                    // Border points join but do not expand the cluster
                    if is_core[j] {
                        stack.push(j);
                    }
                }
            }

            current += 1;
        }

        Ok(labels.into_iter().map(|l| l.unwrap_or(NOISE)).collect())
    }
}

/// Lloyd's k-means with seeded k-means++ initialisation.
///
/// The same input and seed always yield the same partition. `k` larger
/// than the number of points is reduced to the number of points.
pub struct KMeans {
    pub k: usize,
    pub seed: u64,
    pub max_iterations: usize,
}

impl Clusterer for KMeans {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn fit(&self, embeddings: &[Embedding]) -> Result<Vec<i32>, ClusterError> {
        let n = embeddings.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if self.k == 0 {
            return Err(ClusterError::Configuration(
                "n_clusters must be at least 1".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ClusterError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }

        let k = if self.k > n {
            tracing::warn!(requested = self.k, points = n, "n_clusters exceeds face count; reducing");
            n
        } else {
            self.k
        };

        let points: Vec<&[f32]> = embeddings.iter().map(|e| e.values.as_slice()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = init_plus_plus(&points, k, &mut rng);
        let mut assignments = vec![usize::MAX; n];

        for iteration in 0..self.max_iterations {
            let mut changed = false;
            for (i, p) in points.iter().enumerate() {
                let best = nearest(p, &centroids).0;
                if assignments[i] != best {
                    assignments[i] = best;
                    changed = true;
                }
            }

            if !changed {
                tracing::debug!(iteration, "k-means converged");
                break;
            }

            let dim = points[0].len();
            let mut sums = vec![vec![0.0f32; dim]; k];
            let mut counts = vec![0usize; k];
            for (p, &c) in points.iter().zip(assignments.iter()) {
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(p.iter()) {
                    *s += v;
                }
            }
            for c in 0..k {
                // An emptied centroid keeps its previous position
                if counts[c] > 0 {
                    centroids[c] = sums[c].iter().map(|s| s / counts[c] as f32).collect();
                }
            }
        }

        Ok(assignments.into_iter().map(|a| a as i32).collect())
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of and squared distance to the closest centroid (ties go to the lower index).
fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn init_plus_plus(points: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());

    while centroids.len() < k {
        let weights: Vec<f32> = points.iter().map(|p| nearest(p, &centroids).1).collect();
        let total: f32 = weights.iter().sum();

        let next = if total > 0.0 {
            let mut target = rng.gen::<f32>() * total;
            let mut chosen = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // Every point already coincides with a centroid
            rng.gen_range(0..points.len())
        };
        centroids.push(points[next].to_vec());
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn axis(dim: usize, hot: usize, jitter: f32) -> Embedding {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v[(hot + 1) % dim] = jitter;
        Embedding::new(v)
    }

    fn face(id: u64, embedding: Embedding) -> FaceRecord {
        FaceRecord {
            id,
            image_path: format!("img{id}.jpg").into(),
            face_index: 0,
            bbox: BoundingBox::new(0, 0, 100, 100),
            embedding,
            cluster_id: None,
        }
    }

    fn two_groups() -> Vec<FaceRecord> {
        let mut faces = Vec::new();
        for i in 0..5 {
            faces.push(face(i, axis(128, 0, 0.01 * i as f32)));
        }
        for i in 5..10 {
            faces.push(face(i, axis(128, 64, 0.01 * (i - 5) as f32)));
        }
        faces
    }

    #[test]
    fn test_cluster_faces_empty() {
        let dbscan = Dbscan { eps: 0.3, min_samples: 2 };
        let stats = cluster_faces(&mut [], &dbscan).unwrap();
        assert_eq!(stats, ClusteringStats { clusters: 0, noise: 0 });
    }

    #[test]
    fn test_dbscan_two_groups() {
        let mut faces = two_groups();
        let dbscan = Dbscan { eps: 0.3, min_samples: 2 };
        let stats = cluster_faces(&mut faces, &dbscan).unwrap();

        assert_eq!(stats.clusters, 2);
        assert_eq!(stats.noise, 0);
        assert!(faces[..5].iter().all(|f| f.cluster_id == Some(0)));
        assert!(faces[5..].iter().all(|f| f.cluster_id == Some(1)));
    }

    #[test]
    fn test_dbscan_isolated_point_is_noise() {
        let mut faces = two_groups();
        faces.push(face(10, axis(128, 100, 0.0)));
        let dbscan = Dbscan { eps: 0.3, min_samples: 2 };
        let stats = cluster_faces(&mut faces, &dbscan).unwrap();

        assert_eq!(stats.clusters, 2);
        assert_eq!(stats.noise, 1);
        assert_eq!(faces[10].cluster_id, Some(NOISE));
        assert!(!faces[10].is_clustered());
    }

    #[test]
    fn test_dbscan_min_samples_counts_self() {
        let embeddings = vec![axis(4, 0, 0.0), axis(4, 0, 0.01)];
        let labels = Dbscan { eps: 0.1, min_samples: 2 }.fit(&embeddings).unwrap();
        assert_eq!(labels, vec![0, 0]);

        let labels = Dbscan { eps: 0.1, min_samples: 3 }.fit(&embeddings).unwrap();
        assert_eq!(labels, vec![NOISE, NOISE]);
    }

    #[test]
    fn test_kmeans_deterministic() {
        let mut a = two_groups();
        let mut b = two_groups();
        let km = KMeans { k: 2, seed: 42, max_iterations: 100 };
        cluster_faces(&mut a, &km).unwrap();
        cluster_faces(&mut b, &km).unwrap();

        let la: Vec<_> = a.iter().map(|f| f.cluster_id).collect();
        let lb: Vec<_> = b.iter().map(|f| f.cluster_id).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_kmeans_separates_groups() {
        let mut faces = two_groups();
        let km = KMeans { k: 2, seed: 7, max_iterations: 100 };
        let stats = cluster_faces(&mut faces, &km).unwrap();
        assert_eq!(stats.clusters, 2);
        assert_eq!(stats.noise, 0);

        let first = faces[0].cluster_id;
        assert!(faces[..5].iter().all(|f| f.cluster_id == first));
        assert!(faces[5..].iter().all(|f| f.cluster_id != first));
    }

    #[test]
    fn test_kmeans_k_larger_than_points() {
        let embeddings = vec![axis(4, 0, 0.0), axis(4, 2, 0.0)];
        let labels = KMeans { k: 5, seed: 1, max_iterations: 10 }.fit(&embeddings).unwrap();
        assert_eq!(labels.len(), 2);
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn test_kmeans_zero_iterations_rejected() {
        let embeddings = vec![axis(4, 0, 0.0), axis(4, 2, 0.0)];
        let err = KMeans { k: 1, seed: 0, max_iterations: 0 }.fit(&embeddings).unwrap_err();
        assert!(matches!(err, ClusterError::Configuration(_)));
        assert!(ClusterMethod::from_params("kmeans", 0.5, 3, 2, 42, 0).is_err());
    }

    #[test]
    fn test_unknown_method_is_configuration_error() {
        let err = ClusterMethod::from_params("spectral", 0.5, 3, 10, 42, 300).unwrap_err();
        assert!(matches!(err, ClusterError::Configuration(_)));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(ClusterMethod::from_params("dbscan", 0.0, 3, 10, 42, 300).is_err());
        assert!(ClusterMethod::from_params("dbscan", 0.5, 0, 10, 42, 300).is_err());
        assert!(ClusterMethod::from_params("kmeans", 0.5, 3, 0, 42, 300).is_err());
    }

    #[test]
    fn test_method_names_parse() {
        let m = ClusterMethod::from_params("DBSCAN", 0.3, 2, 10, 42, 300).unwrap();
        assert_eq!(m, ClusterMethod::Dbscan { eps: 0.3, min_samples: 2 });
        assert_eq!(m.clusterer().name(), "dbscan");

        let m = ClusterMethod::from_params("kmeans", 0.3, 2, 4, 9, 50).unwrap();
        assert_eq!(m.clusterer().name(), "kmeans");
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut faces = vec![
            face(1, Embedding::new(vec![1.0, 0.0])),
            face(2, Embedding::new(vec![1.0, 0.0, 0.0])),
        ];
        let err = cluster_faces(&mut faces, &Dbscan { eps: 0.3, min_samples: 1 }).unwrap_err();
        assert!(matches!(err, ClusterError::DimensionMismatch { index: 1, .. }));
    }
}
