//! The one-shot run: embeddings → clusters → summaries → folders.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use phosor_core::ingest::{self, CommandEmbedder};
use phosor_core::{build_cluster_summaries, cluster_faces, filter_min_faces, ClusterSummary, FaceRecord};
use phosor_store::{
    create_cluster_representatives, materialize_clusters, ClusterStore, MaterializeOptions, MaterializeReport,
};
use std::path::PathBuf;

/// File the face store is saved to inside the output root.
pub const EMBEDDINGS_FILE: &str = "embeddings.json";

/// Per-run switches that are not part of the persistent config.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Load a saved face store instead of running the embedder.
    pub faces: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub faces: usize,
    pub clusters: Vec<ClusterSummary>,
    /// Clusters dissolved for having too few faces.
    pub dropped: usize,
    pub noise: usize,
    pub materialized: MaterializeReport,
}

fn load_faces(config: &Config, options: &RunOptions) -> Result<Vec<FaceRecord>> {
    if let Some(path) = &options.faces {
        let mut faces = ingest::load_embeddings(path)?;
        for face in &mut faces {
            face.cluster_id = None;
        }
        return Ok(faces);
    }

    let Some(command) = &config.embedder.command else {
        bail!("no embedder configured: set [embedder].command or pass --faces");
    };
    let mut embedder = CommandEmbedder::new(command)?;
    let images = ingest::scan_images(&config.input.dir, config.input.recursive, config.input.min_file_size_kb);
    Ok(ingest::build_face_dataset(&images, &mut embedder))
}

/// Run the full pipeline. In dry-run mode nothing is written.
pub fn run(config: &Config, options: &RunOptions) -> Result<RunReport> {
    let method = config.clustering.method()?;
    let output = &config.output.dir;
    let dry_run = options.dry_run;

    let mut faces = load_faces(config, options)?;
    if faces.is_empty() {
        bail!("no faces found; nothing to cluster");
    }

    let stats = cluster_faces(&mut faces, method.clusterer().as_ref())?;

    let all = build_cluster_summaries(&faces);
    let total = all.len();
    let clusters = filter_min_faces(all, config.clustering.min_faces_per_cluster);
    let dropped = total - clusters.len();
    if dropped > 0 {
        tracing::info!(
            dropped,
            min_faces = config.clustering.min_faces_per_cluster,
            "small clusters moved to unclustered"
        );
    }

    let materialized = materialize_clusters(
        &faces,
        &clusters,
        output,
        &MaterializeOptions {
            mode: config.output.mode,
            dry_run,
            workers: config.output.workers,
        },
    )?;

    if config.output.create_representatives {
        create_cluster_representatives(
            &faces,
            &clusters,
            output,
            config.output.representative_mode,
            dry_run,
            Some(&materialized),
        );
    }

    if dry_run {
        tracing::info!(dry_run, clusters = clusters.len(), "would save cluster summary");
    } else {
        if config.handling.save_embeddings {
            ingest::save_embeddings(&faces, &output.join(EMBEDDINGS_FILE))?;
        }
        ClusterStore::open(output)
            .and_then(|store| store.initialize(clusters.clone()))
            .context("failed to save cluster summary")?;
    }

    Ok(RunReport {
        faces: faces.len(),
        clusters,
        dropped,
        noise: stats.noise,
        materialized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use phosor_core::{BoundingBox, Embedding};
    use phosor_store::{SummaryDocument, UNCLUSTERED_DIR};
    use std::path::Path;

    fn unit(axis: usize, jitter: f32) -> Embedding {
        let mut v = vec![0.0; 4];
        v[axis] = 1.0;
        v[(axis + 1) % 4] = jitter;
        Embedding::new(v)
    }

    /// Two groups of five faces plus one loner, each on its own image.
    fn write_store(dir: &Path) -> PathBuf {
        let input = dir.join("input");
        std::fs::create_dir_all(&input).unwrap();
        let mut faces = Vec::new();
        for i in 0..11u64 {
            let path = input.join(format!("img_{i:02}.jpg"));
            std::fs::write(&path, format!("image {i}")).unwrap();
            let embedding = match i {
                0..=4 => unit(0, i as f32 * 0.01),
                5..=9 => unit(2, i as f32 * 0.01),
                _ => unit(1, 0.0),
            };
            faces.push(FaceRecord {
                id: i + 1,
                image_path: path,
                face_index: 0,
                bbox: BoundingBox::new(0, 0, 10, 10),
                embedding,
                cluster_id: None,
            });
        }
        let store = dir.join("faces.json");
        ingest::save_embeddings(&faces, &store).unwrap();
        store
    }

    fn config(output: &Path) -> Config {
        let mut config = Config::default();
        config.output.dir = output.to_path_buf();
        config.output.create_representatives = false;
        config.clustering.eps = 0.3;
        config.clustering.min_samples = 2;
        config.clustering.min_faces_per_cluster = 1;
        config
    }

    #[test]
    fn test_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let faces = write_store(dir.path());
        let output = dir.path().join("out");

        let report = run(
            &config(&output),
            &RunOptions {
                faces: Some(faces),
                dry_run: false,
            },
        )
        .unwrap();

        assert_eq!(report.faces, 11);
        assert_eq!(report.clusters.len(), 2);
        assert_eq!(report.noise, 1);

        let doc = SummaryDocument::load(&output).unwrap();
        assert_eq!(doc.total_clusters, 2);
        assert_eq!(doc.clusters[0].label, "Person_01");
        assert_eq!(doc.clusters[1].num_faces, 5);
        assert!(output.join("Person_01/img_00.jpg").exists());
        assert!(output.join(UNCLUSTERED_DIR).join("img_10.jpg").exists());
        assert!(output.join(EMBEDDINGS_FILE).exists());
    }

    #[test]
    fn test_small_clusters_go_to_unclustered() {
        let dir = tempfile::tempdir().unwrap();
        let faces = write_store(dir.path());
        let output = dir.path().join("out");
        let mut config = config(&output);
        config.clustering.min_faces_per_cluster = 6;

        let report = run(
            &config,
            &RunOptions {
                faces: Some(faces),
                dry_run: false,
            },
        )
        .unwrap();
        assert!(report.clusters.is_empty());
        assert_eq!(report.dropped, 2);
        assert!(output.join(UNCLUSTERED_DIR).join("img_00.jpg").exists());
        assert_eq!(SummaryDocument::load(&output).unwrap().total_clusters, 0);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let faces = write_store(dir.path());
        let output = dir.path().join("out");

        let report = run(
            &config(&output),
            &RunOptions {
                faces: Some(faces),
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(report.clusters.len(), 2);
        assert_eq!(report.materialized.transferred, 11);
        assert!(!output.exists());
    }

    #[test]
    fn test_empty_store_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let faces = dir.path().join("faces.json");
        ingest::save_embeddings(&[], &faces).unwrap();
        let output = dir.path().join("out");

        let err = run(
            &config(&output),
            &RunOptions {
                faces: Some(faces),
                dry_run: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("no faces"));
        assert!(!output.exists());
    }

    #[test]
    fn test_unknown_method_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let mut config = config(&output);
        config.clustering.method = "meanshift".into();
        assert!(run(&config, &RunOptions::default()).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_embedder_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&config(&dir.path().join("out")), &RunOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no embedder"));
    }
}
