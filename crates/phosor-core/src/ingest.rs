//! Ingestion: image discovery, the detection/embedding collaborator, and
//! the persisted embedding store.

use crate::types::{BoundingBox, Embedding, FaceRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use walkdir::WalkDir;

/// Image extensions the pipeline understands (lowercase, no dot).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to run embedder {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("embedder exited with {status} for {path}: {stderr}")]
    EmbedderFailed {
        path: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("embedder output for {path} is not valid detection JSON: {source}")]
    BadOutput {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("embedder command is empty")]
    EmptyCommand,
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed embeddings file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// True if `path` has one of the supported image extensions.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Find image files under `input_dir`.
///
/// Returns absolute paths in sorted order. Files smaller than
/// `min_file_size_kb` are skipped. A missing directory yields an empty list.
pub fn scan_images(input_dir: &Path, recursive: bool, min_file_size_kb: u64) -> Vec<PathBuf> {
    if !input_dir.is_dir() {
        tracing::error!(dir = %input_dir.display(), "input directory does not exist");
        return Vec::new();
    }

    let min_size = min_file_size_kb * 1024;
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();

    for entry in WalkDir::new(input_dir).max_depth(max_depth).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_image_file(entry.path()) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.len() < min_size => {
                tracing::debug!(path = %entry.path().display(), size = meta.len(), "skipping small file");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "cannot stat file");
                continue;
            }
        }

        let path = std::path::absolute(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
        paths.push(path);
    }

    tracing::info!(count = paths.len(), dir = %input_dir.display(), "found images");
    paths
}

/// One face reported by the detection collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f32; 4],
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub landmarks: Vec<[f32; 2]>,
    pub embedding: Vec<f32>,
}

impl Detection {
    pub fn bounding_box(&self) -> BoundingBox {
        let [x1, y1, x2, y2] = self.bbox.map(|v| v.round() as i32);
        BoundingBox::new(x1, y1, x2, y2)
    }
}

/// Face detection + embedding strategy.
///
/// Returns every face found in the image; an image without faces is an
/// empty list, not an error.
pub trait FaceEmbedder {
    fn detect_and_embed(&mut self, image: &Path) -> Result<Vec<Detection>, IngestError>;
}

/// Runs an external program once per image.
///
/// The image path is appended as the last argument; the program must print a
/// JSON array of [`Detection`] objects on stdout and exit successfully.
pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
}

impl CommandEmbedder {
    pub fn new(argv: &[String]) -> Result<Self, IngestError> {
        let (program, args) = argv.split_first().ok_or(IngestError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl FaceEmbedder for CommandEmbedder {
    fn detect_and_embed(&mut self, image: &Path) -> Result<Vec<Detection>, IngestError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|source| IngestError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(IngestError::EmbedderFailed {
                path: image.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| IngestError::BadOutput {
            path: image.to_path_buf(),
            source,
        })
    }
}

/// Detect and embed every face in `image_paths`, assigning record ids from 1.
///
/// Ids increase in image order, then detection order. An image the embedder
/// fails on is logged and skipped; detections with degenerate boxes are dropped.
pub fn build_face_dataset(image_paths: &[PathBuf], embedder: &mut dyn FaceEmbedder) -> Vec<FaceRecord> {
    let mut faces = Vec::new();
    let mut next_id: u64 = 1;

    tracing::info!(images = image_paths.len(), "extracting faces");

    for path in image_paths {
        let detections = match embedder.detect_and_embed(path) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "face extraction failed; skipping image");
                continue;
            }
        };

        if detections.is_empty() {
            tracing::debug!(path = %path.display(), "no faces detected");
            continue;
        }

        for (face_index, det) in detections.into_iter().enumerate() {
            let bbox = det.bounding_box();
            if !bbox.is_valid() {
                tracing::warn!(path = %path.display(), face_index, ?bbox, "dropping face with degenerate bounding box");
                continue;
            }
            faces.push(FaceRecord {
                id: next_id,
                image_path: path.clone(),
                face_index,
                bbox,
                embedding: Embedding::new(det.embedding),
                cluster_id: None,
            });
            next_id += 1;
        }
    }

    tracing::info!(faces = faces.len(), images = image_paths.len(), "face extraction complete");
    faces
}

/// Write the embedding store as a JSON array of face records.
pub fn save_embeddings(faces: &[FaceRecord], path: &Path) -> Result<(), IngestError> {
    let io_err = |source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_vec_pretty(faces).map_err(|source| IngestError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(io_err)?;
    tracing::info!(faces = faces.len(), path = %path.display(), "saved embeddings");
    Ok(())
}

/// Load a previously saved embedding store.
pub fn load_embeddings(path: &Path) -> Result<Vec<FaceRecord>, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let faces: Vec<FaceRecord> = serde_json::from_slice(&bytes).map_err(|source| IngestError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(faces = faces.len(), path = %path.display(), "loaded embeddings");
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Scripted embedder keyed by file name.
    struct Scripted(HashMap<String, Result<Vec<Detection>, ()>>);

    impl FaceEmbedder for Scripted {
        fn detect_and_embed(&mut self, image: &Path) -> Result<Vec<Detection>, IngestError> {
            let name = image.file_name().unwrap().to_string_lossy().into_owned();
            match self.0.get(&name) {
                Some(Ok(d)) => Ok(d.clone()),
                Some(Err(())) => Err(IngestError::EmptyCommand),
                None => Ok(Vec::new()),
            }
        }
    }

    fn det(bbox: [f32; 4], v: f32) -> Detection {
        Detection {
            bbox,
            confidence: 0.9,
            landmarks: Vec::new(),
            embedding: vec![v, 1.0 - v],
        }
    }

    #[test]
    fn test_build_face_dataset_assigns_monotonic_ids() {
        let mut script = HashMap::new();
        script.insert("a.jpg".to_string(), Ok(vec![det([0.0, 0.0, 10.0, 10.0], 0.1), det([20.0, 20.0, 40.0, 40.0], 0.2)]));
        script.insert("b.jpg".to_string(), Err(()));
        script.insert("c.jpg".to_string(), Ok(vec![det([1.4, 1.6, 9.5, 9.0], 0.3)]));
        let mut embedder = Scripted(script);

        let paths: Vec<PathBuf> = ["a.jpg", "b.jpg", "c.jpg", "d.jpg"].iter().map(PathBuf::from).collect();
        let faces = build_face_dataset(&paths, &mut embedder);

        assert_eq!(faces.len(), 3);
        assert_eq!(faces.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(faces[1].face_index, 1);
        assert_eq!(faces[2].image_path, PathBuf::from("c.jpg"));
        assert_eq!(faces[2].bbox, BoundingBox::new(1, 2, 10, 9));
    }

    #[test]
    fn test_degenerate_boxes_dropped() {
        let mut script = HashMap::new();
        script.insert("a.jpg".to_string(), Ok(vec![det([10.0, 0.0, 10.0, 10.0], 0.1)]));
        let faces = build_face_dataset(&[PathBuf::from("a.jpg")], &mut Scripted(script));
        assert!(faces.is_empty());
    }

    #[test]
    fn test_scan_images_filters_extension_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("big.JPG"), vec![0u8; 2048]).unwrap();
        std::fs::write(root.join("small.png"), vec![0u8; 10]).unwrap();
        std::fs::write(root.join("notes.txt"), vec![0u8; 4096]).unwrap();
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("nested/deep.webp"), vec![0u8; 2048]).unwrap();

        let found = scan_images(root, true, 1);
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["big.JPG", "deep.webp"]);
        assert!(found.iter().all(|p| p.is_absolute()));

        let shallow = scan_images(root, false, 1);
        assert_eq!(shallow.len(), 1);
    }

    #[test]
    fn test_scan_missing_dir() {
        assert!(scan_images(Path::new("/nonexistent/phosor/input"), true, 0).is_empty());
    }

    #[test]
    fn test_embeddings_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/embeddings.json");
        let faces = vec![FaceRecord {
            id: 1,
            image_path: "a.jpg".into(),
            face_index: 0,
            bbox: BoundingBox::new(0, 0, 5, 5),
            embedding: Embedding::new(vec![0.25, 0.75]),
            cluster_id: Some(-1),
        }];
        save_embeddings(&faces, &path).unwrap();
        assert_eq!(load_embeddings(&path).unwrap(), faces);
    }

    #[test]
    fn test_command_embedder_rejects_empty_argv() {
        assert!(matches!(CommandEmbedder::new(&[]), Err(IngestError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_embedder_parses_stdout() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '[{"bbox":[0,0,4,4],"confidence":0.8,"embedding":[1.0,0.0]}]'"#.to_string(),
            "embed".to_string(),
        ];
        let mut embedder = CommandEmbedder::new(&argv).unwrap();
        let detections = embedder.detect_and_embed(Path::new("x.jpg")).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bounding_box(), BoundingBox::new(0, 0, 4, 4));
    }
}
