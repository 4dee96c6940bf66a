//! Cluster state service: curation operations over an output root.
//!
//! Every mutating operation is one read-modify-write cycle: load the summary
//! document, validate, change the folder tree, update the document, and save
//! it last. Callers must serialize operations on one root; [`crate::service`]
//! does that with a single worker thread.

use crate::document::SummaryDocument;
use crate::error::StoreError;
use crate::materialize::copy_with_metadata;
use crate::paths::{
    confined, count_images, is_representative, list_images, unique_destination, validate_filename,
    validate_label, ImageEntry, REPRESENTATIVE_FILE, UNCLUSTERED_DIR,
};
use phosor_core::ClusterSummary;
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// A cluster as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub cluster_id: i32,
    pub label: String,
    pub num_faces: usize,
    /// Image files currently in the folder, representative excluded.
    pub num_images: usize,
    pub sample_images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterImages {
    pub cluster_id: i32,
    pub label: String,
    pub images: Vec<ImageEntry>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameOutcome {
    pub cluster_id: i32,
    pub old_label: String,
    pub new_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub target_id: i32,
    pub merged_clusters: Vec<i32>,
    pub images_moved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub cluster_id: i32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    /// Name the copy was stored under (may carry a collision suffix).
    pub filename: String,
    pub cluster_id: i32,
    pub cluster_label: String,
}

/// Result for one destination of a multi-cluster copy.
#[derive(Debug, Clone, Serialize)]
pub struct CopyOutcome {
    pub cluster_id: i32,
    pub label: Option<String>,
    /// True for the cluster created by this request.
    pub created: bool,
    #[serde(flatten)]
    pub status: CopyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyStatus {
    Copied { filename: String },
    Failed { class: crate::error::ErrorClass, message: String },
}

impl CopyOutcome {
    fn failed(cluster_id: i32, label: Option<String>, created: bool, err: &StoreError) -> Self {
        Self {
            cluster_id,
            label,
            created,
            status: CopyStatus::Failed {
                class: err.class(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_copied(&self) -> bool {
        matches!(self.status, CopyStatus::Copied { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiCopyOutcome {
    pub filename: String,
    pub destinations: Vec<CopyOutcome>,
}

impl MultiCopyOutcome {
    pub fn copied(&self) -> usize {
        self.destinations.iter().filter(|d| d.is_copied()).count()
    }

    /// Some, but not all, destinations failed.
    pub fn is_partial(&self) -> bool {
        let copied = self.copied();
        copied > 0 && copied < self.destinations.len()
    }
}

/// Curation operations over one output root.
#[derive(Debug, Clone)]
pub struct ClusterStore {
    root: PathBuf,
}

impl ClusterStore {
    /// Open the output root. It must already exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::NotFound(format!(
                "output directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh document for `summaries`, replacing any existing one.
    pub fn initialize(&self, summaries: Vec<ClusterSummary>) -> Result<(), StoreError> {
        let mut doc = SummaryDocument::new(summaries);
        doc.save(&self.root)?;
        tracing::info!(clusters = doc.total_clusters, root = %self.root.display(), "saved cluster summary");
        Ok(())
    }

    pub fn document(&self) -> Result<SummaryDocument, StoreError> {
        SummaryDocument::load(&self.root)
    }

    fn cluster_dir(&self, label: &str) -> Result<PathBuf, StoreError> {
        confined(&self.root, &[label])
    }

    fn info(&self, summary: &ClusterSummary) -> ClusterInfo {
        let num_images = self
            .cluster_dir(&summary.label)
            .map(|d| count_images(&d))
            .unwrap_or(0);
        ClusterInfo {
            cluster_id: summary.cluster_id,
            label: summary.label.clone(),
            num_faces: summary.num_faces,
            num_images,
            sample_images: summary.sample_images.clone(),
        }
    }

    pub fn list_clusters(&self) -> Result<Vec<ClusterInfo>, StoreError> {
        let doc = self.document()?;
        Ok(doc.clusters.iter().map(|c| self.info(c)).collect())
    }

    pub fn get_cluster(&self, cluster_id: i32) -> Result<ClusterInfo, StoreError> {
        let doc = self.document()?;
        Ok(self.info(doc.get(cluster_id)?))
    }

    pub fn list_cluster_images(&self, cluster_id: i32) -> Result<ClusterImages, StoreError> {
        let doc = self.document()?;
        let cluster = doc.get(cluster_id)?;
        let dir = self.cluster_dir(&cluster.label)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(format!(
                "cluster folder not found: {}",
                cluster.label
            )));
        }
        let images = list_images(&dir)?;
        Ok(ClusterImages {
            cluster_id,
            label: cluster.label.clone(),
            total: images.len(),
            images,
        })
    }

    pub fn list_unclustered(&self) -> Result<Vec<ImageEntry>, StoreError> {
        list_images(&self.root.join(UNCLUSTERED_DIR))
    }

    /// Preview image for a cluster folder: its representative, else its first image.
    pub fn representative_path(&self, label: &str) -> Result<PathBuf, StoreError> {
        let label = validate_label(label)?;
        let dir = self.cluster_dir(label)?;
        let representative = dir.join(REPRESENTATIVE_FILE);
        if representative.is_file() {
            return Ok(representative);
        }
        list_images(&dir)?
            .into_iter()
            .next()
            .map(|e| e.path)
            .ok_or_else(|| StoreError::NotFound(format!("no images for cluster {label}")))
    }

    /// Give a cluster a new label and rename its folder to match.
    ///
    /// Renaming to the current label changes nothing. A folder that is
    /// already gone, or already carries the new name, is accepted as-is.
    pub fn rename(&self, cluster_id: i32, new_label: &str) -> Result<RenameOutcome, StoreError> {
        let new_label = validate_label(new_label)?;
        let mut doc = self.document()?;
        let old_label = doc.get(cluster_id)?.label.clone();

        if old_label == new_label {
            return Ok(RenameOutcome {
                cluster_id,
                old_label: old_label.clone(),
                new_label: old_label,
            });
        }
        if doc.label_taken(new_label, Some(cluster_id)) {
            return Err(StoreError::Validation(format!(
                "label {new_label:?} already exists"
            )));
        }

        let old_dir = self.cluster_dir(&old_label)?;
        let new_dir = self.cluster_dir(new_label)?;
        match (old_dir.exists(), new_dir.exists()) {
            (true, false) => {
                std::fs::rename(&old_dir, &new_dir).map_err(StoreError::io("rename", &old_dir))?;
                tracing::info!(cluster_id, from = %old_label, to = %new_label, "renamed cluster folder");
            }
            (true, true) => {
                return Err(StoreError::Validation(format!(
                    "a folder named {new_label:?} already exists"
                )))
            }
            (false, true) => {
                tracing::warn!(cluster_id, label = %new_label, "folder already renamed; updating summary only");
            }
            (false, false) => {
                tracing::warn!(cluster_id, label = %old_label, "cluster folder missing; updating label only");
            }
        }

        if let Some(cluster) = doc.find_mut(cluster_id) {
            cluster.label = new_label.to_string();
        }
        doc.save(&self.root)?;

        Ok(RenameOutcome {
            cluster_id,
            old_label,
            new_label: new_label.to_string(),
        })
    }

    /// Fold `source_ids` into `target_id`.
    ///
    /// Every file except the representative moves into the target folder,
    /// replacing same-named files there. The target's face count grows by
    /// the sources' counts without recounting the folder. If a source cannot
    /// be fully moved, it stays in the document alongside its remaining
    /// files, the completed sources are saved, and the error is returned.
    pub fn merge(&self, source_ids: &[i32], target_id: i32) -> Result<MergeOutcome, StoreError> {
        let mut doc = self.document()?;
        let target_label = doc
            .find(target_id)
            .ok_or_else(|| StoreError::NotFound(format!("target cluster {target_id}")))?
            .label
            .clone();

        let mut sources: Vec<i32> = Vec::new();
        for &id in source_ids {
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
        if sources.is_empty() {
            return Err(StoreError::Validation("no source clusters given".into()));
        }
        if sources.contains(&target_id) {
            return Err(StoreError::Validation(format!(
                "cluster {target_id} cannot be merged into itself"
            )));
        }
        let missing: Vec<String> = sources
            .iter()
            .filter(|id| doc.find(**id).is_none())
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::NotFound(format!(
                "source cluster(s) {}",
                missing.join(", ")
            )));
        }

        let target_dir = self.cluster_dir(&target_label)?;
        std::fs::create_dir_all(&target_dir).map_err(StoreError::io("create", &target_dir))?;

        let mut merged = Vec::new();
        let mut images_moved = 0;
        let mut first_error = None;

        for &source_id in &sources {
            let Some(source) = doc.find(source_id).cloned() else {
                continue;
            };
            match self.drain_into(&source.label, &target_dir) {
                Ok(moved) => {
                    images_moved += moved;
                    merged.push(source_id);
                    doc.clusters.retain(|c| c.cluster_id != source_id);
                    if let Some(target) = doc.find_mut(target_id) {
                        target.num_faces += source.num_faces;
                    }
                    tracing::info!(source = %source.label, target = %target_label, moved, "merged cluster");
                }
                Err(e) => {
                    tracing::error!(source = %source.label, error = %e, "merge of cluster failed; keeping it");
                    first_error.get_or_insert(e);
                }
            }
        }

        doc.save(&self.root)?;
        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(MergeOutcome {
            target_id,
            merged_clusters: merged,
            images_moved,
        })
    }

    /// Move the contents of `label`'s folder into `target_dir`, then remove
    /// the emptied folder. The source's own representative is discarded.
    fn drain_into(&self, label: &str, target_dir: &Path) -> Result<usize, StoreError> {
        let dir = self.cluster_dir(label)?;
        if !dir.exists() {
            return Ok(0);
        }
        move_tree(&dir, target_dir, true)
    }

    /// Add an empty cluster with id one past the current maximum.
    pub fn create(&self, label: &str) -> Result<ClusterSummary, StoreError> {
        let label = validate_label(label)?;
        let mut doc = self.document()?;
        if doc.label_taken(label, None) {
            return Err(StoreError::Validation(format!("label {label:?} already exists")));
        }

        let cluster_id = doc.next_cluster_id()?;
        let cluster = self.create_in(&mut doc, cluster_id, label)?;
        doc.save(&self.root)?;
        tracing::info!(cluster_id = cluster.cluster_id, label = %label, "created cluster");
        Ok(cluster)
    }

    fn create_in(&self, doc: &mut SummaryDocument, cluster_id: i32, label: &str) -> Result<ClusterSummary, StoreError> {
        let dir = self.cluster_dir(label)?;
        std::fs::create_dir_all(&dir).map_err(StoreError::io("create", &dir))?;
        let cluster = ClusterSummary {
            cluster_id,
            label: label.to_string(),
            num_faces: 0,
            sample_images: Vec::new(),
        };
        doc.clusters.push(cluster.clone());
        Ok(cluster)
    }

    /// Remove a cluster and everything in its folder.
    pub fn delete(&self, cluster_id: i32) -> Result<DeleteOutcome, StoreError> {
        let mut doc = self.document()?;
        let label = doc.get(cluster_id)?.label.clone();

        let dir = self.cluster_dir(&label)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(StoreError::io("remove", &dir))?;
            tracing::info!(cluster_id, label = %label, "deleted cluster folder");
        } else {
            tracing::warn!(cluster_id, label = %label, "cluster folder already gone");
        }

        doc.clusters.retain(|c| c.cluster_id != cluster_id);
        doc.save(&self.root)?;
        Ok(DeleteOutcome { cluster_id, label })
    }

    fn unclustered_source(&self, filename: &str) -> Result<PathBuf, StoreError> {
        let filename = validate_filename(filename)?;
        let source = confined(&self.root, &[UNCLUSTERED_DIR, filename])?;
        if !source.is_file() {
            return Err(StoreError::NotFound(format!("image not found: {filename}")));
        }
        Ok(source)
    }

    /// Copy `source` into `label`'s folder under a collision-free name and
    /// bump the cluster's face count.
    fn copy_into(&self, doc: &mut SummaryDocument, cluster_id: i32, source: &Path) -> Result<String, StoreError> {
        let label = doc.get(cluster_id)?.label.clone();
        let dir = self.cluster_dir(&label)?;
        std::fs::create_dir_all(&dir).map_err(StoreError::io("create", &dir))?;

        let file_name = source.file_name().unwrap_or_else(|| OsStr::new("image"));
        let dest = unique_destination(&dir, file_name, &HashSet::new());
        copy_with_metadata(source, &dest)?;

        let stored = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(cluster) = doc.find_mut(cluster_id) {
            cluster.num_faces += 1;
        }
        tracing::info!(cluster_id, label = %label, file = %stored, "copied image into cluster");
        Ok(stored)
    }

    /// Copy an unclustered image into one cluster. The original stays in place.
    pub fn move_image(&self, filename: &str, target_cluster_id: i32) -> Result<MoveOutcome, StoreError> {
        let source = self.unclustered_source(filename)?;
        let mut doc = self.document()?;
        let label = doc.get(target_cluster_id)?.label.clone();

        let stored = self.copy_into(&mut doc, target_cluster_id, &source)?;
        doc.save(&self.root)?;

        Ok(MoveOutcome {
            filename: stored,
            cluster_id: target_cluster_id,
            cluster_label: label,
        })
    }

    /// Copy an unclustered image into several clusters, optionally creating
    /// a new one for it first.
    ///
    /// Each destination succeeds or fails on its own; failures are reported
    /// in the outcome, not as an error. A new label that is invalid or taken
    /// rejects the whole request before anything is written.
    pub fn move_image_to_many(
        &self,
        filename: &str,
        target_cluster_ids: &[i32],
        new_cluster_label: Option<&str>,
    ) -> Result<MultiCopyOutcome, StoreError> {
        let source = self.unclustered_source(filename)?;
        let mut doc = self.document()?;

        let new_label = match new_cluster_label {
            Some(label) => {
                let label = validate_label(label)?;
                if doc.label_taken(label, None) {
                    return Err(StoreError::Validation(format!(
                        "cluster {label:?} already exists"
                    )));
                }
                Some(label)
            }
            None => None,
        };
        let new_cluster_id = match new_label {
            Some(_) => Some(doc.next_cluster_id()?),
            None => None,
        };

        let mut destinations = Vec::new();

        if let (Some(label), Some(cluster_id)) = (new_label, new_cluster_id) {
            match self.create_in(&mut doc, cluster_id, label) {
                Ok(cluster) => {
                    let outcome = match self.copy_into(&mut doc, cluster.cluster_id, &source) {
                        Ok(stored) => {
                            // Samples only ever name a file that made it into the folder
                            if let Some(c) = doc.find_mut(cluster.cluster_id) {
                                c.sample_images = vec![filename.to_string()];
                            }
                            CopyOutcome {
                                cluster_id: cluster.cluster_id,
                                label: Some(cluster.label.clone()),
                                created: true,
                                status: CopyStatus::Copied { filename: stored },
                            }
                        }
                        Err(e) => CopyOutcome::failed(cluster.cluster_id, Some(cluster.label.clone()), true, &e),
                    };
                    tracing::info!(cluster_id = cluster.cluster_id, label = %label, "created cluster for image");
                    destinations.push(outcome);
                }
                Err(e) => {
                    tracing::error!(label = %label, error = %e, "could not create cluster");
                    destinations.push(CopyOutcome::failed(cluster_id, Some(label.to_string()), true, &e));
                }
            }
        }

        let mut seen = HashSet::new();
        for &cluster_id in target_cluster_ids {
            if !seen.insert(cluster_id) {
                continue;
            }
            let label = doc.find(cluster_id).map(|c| c.label.clone());
            let outcome = match self.copy_into(&mut doc, cluster_id, &source) {
                Ok(stored) => CopyOutcome {
                    cluster_id,
                    label,
                    created: false,
                    status: CopyStatus::Copied { filename: stored },
                },
                Err(e) => {
                    tracing::warn!(cluster_id, error = %e, "copy to cluster failed");
                    CopyOutcome::failed(cluster_id, label, false, &e)
                }
            };
            destinations.push(outcome);
        }

        doc.save(&self.root)?;

        Ok(MultiCopyOutcome {
            filename: filename.to_string(),
            destinations,
        })
    }

    /// Delete one image from a cluster folder; the face count drops by one, never below zero.
    pub fn delete_image(&self, cluster_id: i32, filename: &str) -> Result<(), StoreError> {
        let filename = validate_filename(filename)?;
        let mut doc = self.document()?;
        let label = doc.get(cluster_id)?.label.clone();

        let path = confined(&self.root, &[&label, filename])?;
        if !path.exists() || is_representative(&path) {
            return Err(StoreError::NotFound(format!("image not found: {filename}")));
        }
        if !path.is_file() {
            return Err(StoreError::Validation(format!("{filename} is not a file")));
        }

        std::fs::remove_file(&path).map_err(StoreError::io("delete", &path))?;
        tracing::info!(cluster_id, label = %label, file = %filename, "deleted image");

        if let Some(cluster) = doc.find_mut(cluster_id) {
            cluster.num_faces = cluster.num_faces.saturating_sub(1);
        }
        doc.save(&self.root)?;
        Ok(())
    }
}

/// Move every entry of `dir` into `target`, descending into subfolders, and
/// remove `dir` once it is empty. Same-named files in `target` are replaced.
/// Returns the number of files moved.
fn move_tree(dir: &Path, target: &Path, top_level: bool) -> Result<usize, StoreError> {
    let mut moved = 0;
    let entries = std::fs::read_dir(dir).map_err(StoreError::io("list", dir))?;
    for entry in entries {
        let entry = entry.map_err(StoreError::io("list", dir))?;
        let path = entry.path();
        let dest = target.join(entry.file_name());
        let file_type = entry.file_type().map_err(StoreError::io("stat", &path))?;

        if file_type.is_dir() {
            if dest.exists() && !dest.is_dir() {
                return Err(StoreError::Validation(format!(
                    "cannot merge folder {} over file {}",
                    path.display(),
                    dest.display()
                )));
            }
            std::fs::create_dir_all(&dest).map_err(StoreError::io("create", &dest))?;
            moved += move_tree(&path, &dest, false)?;
            continue;
        }

        if top_level && is_representative(&path) {
            std::fs::remove_file(&path).map_err(StoreError::io("remove", &path))?;
            continue;
        }
        if dest.is_dir() {
            return Err(StoreError::Validation(format!(
                "cannot replace folder {} with a file",
                dest.display()
            )));
        }
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(&dest).map_err(StoreError::io("replace", &dest))?;
            tracing::info!(file = %dest.display(), "replaced existing file");
        }
        crate::materialize::move_file(&path, &dest)?;
        moved += 1;
    }

    // Non-recursive: anything left behind keeps the folder and fails the merge.
    std::fs::remove_dir(dir).map_err(StoreError::io("remove", dir))?;
    Ok(moved)
}
