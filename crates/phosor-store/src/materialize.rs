//! Folder materialization: one directory per cluster label plus
//! `unclustered`, filled by copying or moving the source images.

use crate::error::StoreError;
use crate::paths::{unique_destination, UNCLUSTERED_DIR};
use phosor_core::{ClusterSummary, FaceRecord, NOISE};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_WORKERS: usize = 4;

/// Whether sources survive materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(TransferMode::Copy),
            "move" => Ok(TransferMode::Move),
            other => Err(format!("unknown transfer mode {other:?} (expected \"copy\" or \"move\")")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaterializeOptions {
    pub mode: TransferMode,
    /// Log every intended action without writing anything.
    pub dry_run: bool,
    /// Upper bound on concurrent file transfers.
    pub workers: usize,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            mode: TransferMode::Copy,
            dry_run: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// One source image bound for one cluster folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    /// Cluster id of the destination folder ([`NOISE`] for `unclustered`).
    pub cluster_id: i32,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub planned: usize,
    pub transferred: usize,
    pub missing: usize,
    pub failed: usize,
    /// Where each (cluster id, source image) pair ended up.
    pub placements: HashMap<(i32, PathBuf), PathBuf>,
}

impl MaterializeReport {
    /// Path of `source`'s copy in cluster `cluster_id`'s folder, if it was placed there.
    pub fn placed(&self, cluster_id: i32, source: &Path) -> Option<&Path> {
        self.placements
            .get(&(cluster_id, source.to_path_buf()))
            .map(PathBuf::as_path)
    }
}

/// Folder for each kept cluster id, plus [`NOISE`] for `unclustered`.
pub fn cluster_dirs(root: &Path, summaries: &[ClusterSummary]) -> BTreeMap<i32, PathBuf> {
    let mut dirs: BTreeMap<i32, PathBuf> = summaries
        .iter()
        .map(|s| (s.cluster_id, root.join(&s.label)))
        .collect();
    dirs.insert(NOISE, root.join(UNCLUSTERED_DIR));
    dirs
}

/// Create the output root, every cluster folder and `unclustered`.
pub fn prepare_output_dirs(
    root: &Path,
    summaries: &[ClusterSummary],
    dry_run: bool,
) -> Result<BTreeMap<i32, PathBuf>, StoreError> {
    let dirs = cluster_dirs(root, summaries);
    for dir in dirs.values() {
        if dry_run {
            tracing::info!(dry_run, dir = %dir.display(), "would create folder");
            continue;
        }
        std::fs::create_dir_all(dir).map_err(StoreError::io("create", dir))?;
        tracing::debug!(dir = %dir.display(), "created folder");
    }
    tracing::info!(folders = dirs.len(), dry_run, "prepared output folders");
    Ok(dirs)
}

/// Decide every destination path up front, in face-record order.
///
/// Each distinct (folder, image) pair is planned once. Faces whose cluster
/// has no summary (noise, unassigned, or filtered out) go to `unclustered`.
/// Name collisions get `_1`, `_2`, ... suffixes, against both existing files
/// and earlier plans, so two same-named sources never share a destination.
pub fn plan_transfers(faces: &[FaceRecord], dirs: &BTreeMap<i32, PathBuf>) -> Vec<PlannedTransfer> {
    let mut seen: HashSet<(i32, &Path)> = HashSet::new();
    let mut reserved: HashSet<PathBuf> = HashSet::new();
    let mut plan = Vec::new();

    for face in faces {
        let cluster_id = match face.cluster_id {
            Some(id) if dirs.contains_key(&id) => id,
            _ => NOISE,
        };
        if !seen.insert((cluster_id, face.image_path.as_path())) {
            continue;
        }
        let Some(file_name) = face.image_path.file_name() else {
            tracing::warn!(path = %face.image_path.display(), "source has no file name; skipping");
            continue;
        };
        let dir = &dirs[&cluster_id];
        let destination = unique_destination(dir, file_name, &reserved);
        reserved.insert(destination.clone());
        plan.push(PlannedTransfer {
            cluster_id,
            source: face.image_path.clone(),
            destination,
        });
    }
    plan
}

/// Copy or move every face's source image into its cluster folder.
///
/// Missing sources and per-file failures are logged and counted; they never
/// stop the batch. Transfers run on a bounded worker pool, grouped by source
/// so that in move mode a shared source is copied to all but its last
/// destination and moved into that one.
pub fn materialize_clusters(
    faces: &[FaceRecord],
    summaries: &[ClusterSummary],
    root: &Path,
    options: &MaterializeOptions,
) -> Result<MaterializeReport, StoreError> {
    let dirs = prepare_output_dirs(root, summaries, options.dry_run)?;
    let plan = plan_transfers(faces, &dirs);

    let mut report = MaterializeReport {
        planned: plan.len(),
        ..Default::default()
    };

    let mut by_source: Vec<(&Path, Vec<&PlannedTransfer>)> = Vec::new();
    let mut index: HashMap<&Path, usize> = HashMap::new();
    for t in &plan {
        let slot = *index.entry(t.source.as_path()).or_insert_with(|| {
            by_source.push((t.source.as_path(), Vec::new()));
            by_source.len() - 1
        });
        by_source[slot].1.push(t);
    }

    let mode = options.mode;
    let dry_run = options.dry_run;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(|i| format!("phosor-io-{i}"))
        .build()?;

    let outcomes: Vec<Vec<(&PlannedTransfer, Outcome)>> = pool.install(|| {
        by_source
            .par_iter()
            .map(|(source, transfers)| transfer_source(source, transfers, mode, dry_run))
            .collect()
    });

    for (t, outcome) in outcomes.into_iter().flatten() {
        match outcome {
            Outcome::Done => {
                report.transferred += 1;
                report
                    .placements
                    .insert((t.cluster_id, t.source.clone()), t.destination.clone());
            }
            Outcome::Missing => report.missing += 1,
            Outcome::Failed => report.failed += 1,
        }
    }

    if dry_run {
        tracing::info!(mode = mode.as_str(), images = report.transferred, "[dry run] would transfer images");
    } else {
        tracing::info!(
            mode = mode.as_str(),
            transferred = report.transferred,
            missing = report.missing,
            failed = report.failed,
            "materialized clusters"
        );
    }
    Ok(report)
}

enum Outcome {
    Done,
    Missing,
    Failed,
}

fn transfer_source<'a>(
    source: &Path,
    transfers: &[&'a PlannedTransfer],
    mode: TransferMode,
    dry_run: bool,
) -> Vec<(&'a PlannedTransfer, Outcome)> {
    if !source.is_file() {
        tracing::warn!(path = %source.display(), "source file not found; skipping");
        return transfers.iter().map(|t| (*t, Outcome::Missing)).collect();
    }

    let last = transfers.len().saturating_sub(1);
    transfers
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let op = if mode == TransferMode::Move && i == last {
                TransferMode::Move
            } else {
                TransferMode::Copy
            };

            if dry_run {
                tracing::info!(
                    dry_run,
                    mode = op.as_str(),
                    from = %source.display(),
                    to = %t.destination.display(),
                    "would transfer image"
                );
                return (*t, Outcome::Done);
            }

            let result = match op {
                TransferMode::Copy => copy_with_metadata(source, &t.destination),
                TransferMode::Move => move_file(source, &t.destination),
            };
            match result {
                Ok(()) => (*t, Outcome::Done),
                Err(e) => {
                    tracing::error!(from = %source.display(), to = %t.destination.display(), error = %e, "transfer failed");
                    (*t, Outcome::Failed)
                }
            }
        })
        .collect()
}

/// Copy bytes, permissions and modification time.
///
/// A failed copy leaves no partial destination behind. Once the bytes are
/// written the copy counts as done; a lost mtime is only logged.
pub fn copy_with_metadata(source: &Path, destination: &Path) -> Result<(), StoreError> {
    if let Err(e) = std::fs::copy(source, destination) {
        let _ = std::fs::remove_file(destination);
        return Err(StoreError::io("copy to", destination)(e));
    }

    // Read-only handle: the copy inherits the source's permissions, which may exclude writing.
    let mtime = std::fs::metadata(source)
        .and_then(|m| m.modified())
        .and_then(|modified| std::fs::File::open(destination)?.set_modified(modified));
    if let Err(e) = mtime {
        tracing::warn!(path = %destination.display(), error = %e, "could not preserve modification time");
    }
    Ok(())
}

/// Rename, falling back to copy + delete across filesystems.
pub fn move_file(source: &Path, destination: &Path) -> Result<(), StoreError> {
    if std::fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    copy_with_metadata(source, destination)?;
    std::fs::remove_file(source).map_err(StoreError::io("remove", source))
}
