//! The persisted cluster summary document (`clusters_summary.json`).

use crate::error::StoreError;
use phosor_core::ClusterSummary;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "clusters_summary.json";

/// Authoritative metadata for the clusters under an output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryDocument {
    pub clusters: Vec<ClusterSummary>,
    pub total_clusters: usize,
}

/// Both historical on-disk shapes: the wrapper object and a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredForm {
    Wrapped {
        clusters: Vec<ClusterSummary>,
    },
    Bare(Vec<ClusterSummary>),
}

impl SummaryDocument {
    pub fn new(clusters: Vec<ClusterSummary>) -> Self {
        let total_clusters = clusters.len();
        Self {
            clusters,
            total_clusters,
        }
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(SUMMARY_FILE)
    }

    /// Parse either document shape; `total_clusters` is always re-derived.
    pub fn from_json(bytes: &[u8]) -> Result<Self, StoreError> {
        let clusters = match serde_json::from_slice::<StoredForm>(bytes)? {
            StoredForm::Wrapped { clusters } => clusters,
            StoredForm::Bare(clusters) => clusters,
        };
        Ok(Self::new(clusters))
    }

    pub fn load(root: &Path) -> Result<Self, StoreError> {
        let path = Self::path(root);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!(
                    "cluster summary not found at {}",
                    path.display()
                )))
            }
            Err(e) => return Err(StoreError::io("read", &path)(e)),
        };
        Self::from_json(&bytes)
    }

    /// Write the document, replacing the previous one in a single rename.
    pub fn save(&mut self, root: &Path) -> Result<(), StoreError> {
        self.total_clusters = self.clusters.len();
        let path = Self::path(root);
        let tmp = root.join(format!(".{SUMMARY_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, json).map_err(StoreError::io("write", &tmp))?;
        std::fs::rename(&tmp, &path).map_err(StoreError::io("replace", &path))?;
        tracing::debug!(path = %path.display(), clusters = self.total_clusters, "saved cluster summary");
        Ok(())
    }

    pub fn find(&self, cluster_id: i32) -> Option<&ClusterSummary> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    pub fn find_mut(&mut self, cluster_id: i32) -> Option<&mut ClusterSummary> {
        self.clusters.iter_mut().find(|c| c.cluster_id == cluster_id)
    }

    /// Look a cluster up, reporting an unknown id as not-found.
    pub fn get(&self, cluster_id: i32) -> Result<&ClusterSummary, StoreError> {
        self.find(cluster_id)
            .ok_or_else(|| StoreError::NotFound(format!("cluster {cluster_id}")))
    }

    /// True if `label` belongs to a cluster other than `except`.
    pub fn label_taken(&self, label: &str, except: Option<i32>) -> bool {
        self.clusters
            .iter()
            .any(|c| c.label == label && Some(c.cluster_id) != except)
    }

    /// One greater than the largest cluster id, or 0 for an empty document.
    pub fn next_cluster_id(&self) -> Result<i32, StoreError> {
        match self.clusters.iter().map(|c| c.cluster_id).max() {
            None => Ok(0),
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| StoreError::Validation(format!("no cluster id left after {max}"))),
        }
    }
}
