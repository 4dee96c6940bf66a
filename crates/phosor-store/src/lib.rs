//! phosor-store — Cluster folders and the JSON/filesystem cluster state service.
//!
//! Materializes clusters into one folder per label, renders preview images,
//! and serializes curation operations through a single writer thread.

pub mod document;
pub mod error;
mod font;
pub mod materialize;
pub mod paths;
pub mod representative;
pub mod service;
pub mod store;

pub use document::{SummaryDocument, SUMMARY_FILE};
pub use error::{ErrorClass, StoreError};
pub use materialize::{materialize_clusters, MaterializeOptions, MaterializeReport, TransferMode};
pub use paths::{ImageEntry, UNCLUSTERED_DIR};
pub use representative::{create_cluster_representatives, RepresentativeMode, RepresentativeReport};
pub use service::{spawn_store, StoreHandle};
pub use store::{
    ClusterImages, ClusterInfo, ClusterStore, CopyOutcome, CopyStatus, DeleteOutcome, MergeOutcome,
    MoveOutcome, MultiCopyOutcome, RenameOutcome,
};
