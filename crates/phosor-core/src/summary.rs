//! Cluster summaries derived from a clustered face set.

use crate::types::{ClusterSummary, FaceRecord};
use std::collections::BTreeMap;

/// Number of sample images kept per summary.
pub const SAMPLE_IMAGES: usize = 3;

/// Label for the cluster at 1-based `rank`, e.g. `Person_01`, `Person_120`.
pub fn person_label(rank: usize) -> String {
    format!("Person_{rank:02}")
}

/// Build one summary per non-noise cluster, ordered by ascending cluster id.
///
/// Labels follow rank, not the engine's ids: ids {3, 7, 12} become
/// `Person_01`, `Person_02`, `Person_03`. Sample images are the first
/// distinct image paths in record order.
pub fn build_cluster_summaries(faces: &[FaceRecord]) -> Vec<ClusterSummary> {
    let mut groups: BTreeMap<i32, Vec<&FaceRecord>> = BTreeMap::new();
    for face in faces.iter().filter(|f| f.is_clustered()) {
        if let Some(id) = face.cluster_id {
            groups.entry(id).or_default().push(face);
        }
    }

    let summaries: Vec<ClusterSummary> = groups
        .into_iter()
        .enumerate()
        .map(|(i, (cluster_id, members))| {
            let mut sample_images: Vec<String> = Vec::with_capacity(SAMPLE_IMAGES);
            for face in &members {
                if sample_images.len() == SAMPLE_IMAGES {
                    break;
                }
                let path = face.image_path.to_string_lossy().into_owned();
                if !sample_images.contains(&path) {
                    sample_images.push(path);
                }
            }

            ClusterSummary {
                cluster_id,
                label: person_label(i + 1),
                num_faces: members.len(),
                sample_images,
            }
        })
        .collect();

    tracing::info!(clusters = summaries.len(), "built cluster summaries");
    summaries
}

/// Keep only summaries with at least `min_faces` faces.
pub fn filter_min_faces(summaries: Vec<ClusterSummary>, min_faces: usize) -> Vec<ClusterSummary> {
    let before = summaries.len();
    let kept: Vec<ClusterSummary> = summaries
        .into_iter()
        .filter(|s| s.num_faces >= min_faces)
        .collect();
    if kept.len() < before {
        tracing::info!(
            dropped = before - kept.len(),
            min_faces,
            "dropped clusters below minimum size"
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding, NOISE};

    fn face(id: u64, image: &str, cluster_id: i32) -> FaceRecord {
        FaceRecord {
            id,
            image_path: image.into(),
            face_index: 0,
            bbox: BoundingBox::new(0, 0, 10, 10),
            embedding: Embedding::new(vec![1.0; 4]),
            cluster_id: Some(cluster_id),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(build_cluster_summaries(&[]).is_empty());
    }

    #[test]
    fn test_labels_follow_rank_not_id() {
        let faces = vec![
            face(1, "a.jpg", 12),
            face(2, "b.jpg", 3),
            face(3, "c.jpg", 7),
        ];
        let summaries = build_cluster_summaries(&faces);
        let pairs: Vec<(i32, &str)> = summaries
            .iter()
            .map(|s| (s.cluster_id, s.label.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![(3, "Person_01"), (7, "Person_02"), (12, "Person_03")]
        );
    }

    #[test]
    fn test_noise_is_excluded_and_counts_add_up() {
        let faces = vec![
            face(1, "a.jpg", 0),
            face(2, "b.jpg", NOISE),
            face(3, "c.jpg", 1),
            face(4, "d.jpg", 0),
        ];
        let summaries = build_cluster_summaries(&faces);
        assert_eq!(summaries.len(), 2);
        let total: usize = summaries.iter().map(|s| s.num_faces).sum();
        assert_eq!(total, faces.iter().filter(|f| f.is_clustered()).count());
    }

    #[test]
    fn test_sample_images_distinct_first_seen() {
        let faces = vec![
            face(1, "z.jpg", 0),
            face(2, "z.jpg", 0),
            face(3, "b.jpg", 0),
            face(4, "a.jpg", 0),
            face(5, "c.jpg", 0),
        ];
        let summaries = build_cluster_summaries(&faces);
        assert_eq!(summaries[0].num_faces, 5);
        assert_eq!(summaries[0].sample_images, vec!["z.jpg", "b.jpg", "a.jpg"]);
    }

    #[test]
    fn test_label_padding() {
        assert_eq!(person_label(1), "Person_01");
        assert_eq!(person_label(10), "Person_10");
        assert_eq!(person_label(123), "Person_123");
    }

    #[test]
    fn test_labels_unique_and_increasing() {
        let faces: Vec<FaceRecord> = (0..30).map(|i| face(i, "x.jpg", (i * 3) as i32)).collect();
        let summaries = build_cluster_summaries(&faces);
        for (i, s) in summaries.iter().enumerate() {
            assert_eq!(s.label, person_label(i + 1));
        }
        let ids: Vec<i32> = summaries.iter().map(|s| s.cluster_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_filter_min_faces() {
        let faces = vec![
            face(1, "a.jpg", 0),
            face(2, "b.jpg", 0),
            face(3, "c.jpg", 1),
        ];
        let summaries = filter_min_faces(build_cluster_summaries(&faces), 2);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].label, "Person_01");
    }
}
