//! phosor-core — Face records, embedding clustering and cluster summaries.
//!
//! Clusters face embeddings with DBSCAN (cosine distance) or seeded
//! k-means, and derives the `Person_NN` summaries the rest of Phosor
//! materializes and curates.

pub mod cluster;
pub mod ingest;
pub mod summary;
pub mod types;

pub use cluster::{cluster_faces, ClusterError, ClusterMethod, Clusterer, ClusteringStats};
pub use summary::{build_cluster_summaries, filter_min_faces};
pub use types::{BoundingBox, ClusterSummary, Embedding, FaceRecord, NOISE};
