use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cluster id reserved for faces that belong to no cluster (density noise).
pub const NOISE: i32 = -1;

/// Axis-aligned face bounding box in pixel coordinates.
///
/// Serialized as `[x1, y1, x2, y2]`, matching the detection collaborator's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// True when the box has positive width and height.
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Grow the box by `pad` pixels on every side and clamp it to a
    /// `width` x `height` image. Returns `None` if nothing is left inside.
    pub fn padded_within(&self, pad: i32, width: u32, height: u32) -> Option<BoundingBox> {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX);
        let clamped = BoundingBox {
            x1: (self.x1 - pad).clamp(0, max_x),
            y1: (self.y1 - pad).clamp(0, max_y),
            x2: (self.x2 + pad).clamp(0, max_x),
            y2: (self.y2 + pad).clamp(0, max_y),
        };
        clamped.is_valid().then_some(clamped)
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Face embedding vector (typically 512-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector is
    /// similar to nothing (0.0).
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

    /// Cosine distance `1 - similarity`, in [0, 2].
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// One detected face: where it is, which image it came from, and its embedding.
///
/// Everything except `cluster_id` is fixed at ingestion; the cluster engine
/// sets `cluster_id` once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: u64,
    pub image_path: PathBuf,
    /// Position of this face among the faces detected in `image_path`.
    pub face_index: usize,
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    #[serde(default)]
    pub cluster_id: Option<i32>,
}

impl FaceRecord {
    /// True when the engine placed this face in a real cluster.
    pub fn is_clustered(&self) -> bool {
        matches!(self.cluster_id, Some(id) if id != NOISE)
    }
}

/// Human-facing description of one identity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: i32,
    pub label: String,
    pub num_faces: usize,
    #[serde(default)]
    pub sample_images: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_bbox_serializes_as_array() {
        let bbox = BoundingBox::new(1, 2, 30, 40);
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[1,2,30,40]");
        let back: BoundingBox = serde_json::from_str("[1,2,30,40]").unwrap();
        assert_eq!(back, bbox);
    }

    #[test]
    fn test_bbox_padding_clamps_to_image() {
        let bbox = BoundingBox::new(5, 5, 50, 60);
        let padded = bbox.padded_within(20, 64, 64).unwrap();
        assert_eq!(padded, BoundingBox::new(0, 0, 64, 64));
    }

    #[test]
    fn test_bbox_padding_outside_image() {
        let bbox = BoundingBox::new(100, 100, 120, 120);
        assert!(bbox.padded_within(0, 50, 50).is_none());
    }

    #[test]
    fn test_face_record_json_shape() {
        let json = r#"{
            "id": 1,
            "image_path": "/photos/a.jpg",
            "face_index": 0,
            "bbox": [0, 0, 10, 10],
            "embedding": [0.5, 0.5]
        }"#;
        let face: FaceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(face.cluster_id, None);
        assert_eq!(face.embedding.dim(), 2);
        assert!(!face.is_clustered());
    }
}
