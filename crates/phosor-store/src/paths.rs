//! Output-root path rules: label and filename validation, confinement,
//! collision-free destination names, and image listings.

use crate::document::SUMMARY_FILE;
use crate::error::StoreError;
use phosor_core::ingest::is_image_file;
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Folder for images that belong to no cluster.
pub const UNCLUSTERED_DIR: &str = "unclustered";
/// File stem of a cluster's preview image; never counted or listed.
pub const REPRESENTATIVE_STEM: &str = "_representative";
/// Name the materializer writes representatives under.
pub const REPRESENTATIVE_FILE: &str = "_representative.jpg";

const RESERVED_NAMES: [&str; 3] = [UNCLUSTERED_DIR, SUMMARY_FILE, "embeddings.json"];

/// True for `_representative.<ext>`.
pub fn is_representative(path: &Path) -> bool {
    path.file_stem() == Some(OsStr::new(REPRESENTATIVE_STEM))
}

/// Ensure `name` is exactly one ordinary path component.
fn single_component(name: &str, what: &str) -> Result<(), StoreError> {
    if name.contains(['/', '\\', '\0']) {
        return Err(StoreError::Validation(format!(
            "{what} {name:?} must not contain path separators"
        )));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::Validation(format!(
            "{what} {name:?} does not name an entry inside the output directory"
        ))),
    }
}

/// Validate a cluster label and return it trimmed.
pub fn validate_label(label: &str) -> Result<&str, StoreError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(StoreError::Validation("label cannot be empty".into()));
    }
    single_component(label, "label")?;
    if RESERVED_NAMES.contains(&label) || label.starts_with('.') {
        return Err(StoreError::Validation(format!("label {label:?} is reserved")));
    }
    Ok(label)
}

/// Validate an image filename supplied by a caller.
pub fn validate_filename(filename: &str) -> Result<&str, StoreError> {
    if filename.is_empty() {
        return Err(StoreError::Validation("filename cannot be empty".into()));
    }
    single_component(filename, "filename")?;
    Ok(filename)
}

/// Join already-validated components onto `root` and confirm the result
/// stays inside it, following symlinks for entries that exist.
pub fn confined(root: &Path, parts: &[&str]) -> Result<PathBuf, StoreError> {
    let mut path = root.to_path_buf();
    for part in parts {
        single_component(part, "path component")?;
        path.push(part);
    }

    if let Ok(resolved) = path.canonicalize() {
        let root = root
            .canonicalize()
            .map_err(StoreError::io("resolve", root))?;
        if !resolved.starts_with(&root) {
            return Err(StoreError::Validation(format!(
                "{} resolves outside the output directory",
                path.display()
            )));
        }
    }
    Ok(path)
}

/// Pick a name for `file_name` inside `dir` that neither exists on disk nor
/// appears in `reserved`: `a.jpg`, then `a_1.jpg`, `a_2.jpg`, ...
pub fn unique_destination(dir: &Path, file_name: &OsStr, reserved: &HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(file_name);
    if !taken(&candidate, reserved) {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}{ext}"));
        if !taken(&candidate, reserved) {
            return candidate;
        }
        counter += 1;
    }
}

fn taken(path: &Path, reserved: &HashSet<PathBuf>) -> bool {
    reserved.contains(path) || path.symlink_metadata().is_ok()
}

/// An image file inside a cluster or the unclustered folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Image files directly inside `dir`, sorted by name, without the
/// representative. A missing directory lists as empty.
pub fn list_images(dir: &Path) -> Result<Vec<ImageEntry>, StoreError> {
    let read = match std::fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io("list", dir)(e)),
    };

    let mut images = Vec::new();
    for entry in read {
        let entry = entry.map_err(StoreError::io("list", dir))?;
        let path = entry.path();
        if is_representative(&path) || !is_image_file(&path) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        images.push(ImageEntry {
            filename: entry.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
        });
    }
    images.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(images)
}

/// Number of image files in `dir` (representative excluded).
pub fn count_images(dir: &Path) -> usize {
    list_images(dir).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_label() {
        assert_eq!(validate_label("  Alex ").unwrap(), "Alex");
        assert!(validate_label("").is_err());
        assert!(validate_label("   ").is_err());
        assert!(validate_label("..").is_err());
        assert!(validate_label(".").is_err());
        assert!(validate_label("a/b").is_err());
        assert!(validate_label("..\\x").is_err());
        assert!(validate_label("unclustered").is_err());
        assert!(validate_label("clusters_summary.json").is_err());
        assert!(validate_label(".hidden").is_err());
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("a.jpg").is_ok());
        assert!(validate_filename("../a.jpg").is_err());
        assert!(validate_filename("/etc/passwd").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn test_is_representative() {
        assert!(is_representative(Path::new("x/_representative.jpg")));
        assert!(is_representative(Path::new("_representative.png")));
        assert!(!is_representative(Path::new("representative.jpg")));
    }

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let name = OsStr::new("a.jpg");
        let reserved = HashSet::new();

        assert_eq!(unique_destination(root, name, &reserved), root.join("a.jpg"));
        std::fs::write(root.join("a.jpg"), b"1").unwrap();
        assert_eq!(unique_destination(root, name, &reserved), root.join("a_1.jpg"));
        std::fs::write(root.join("a_1.jpg"), b"2").unwrap();
        assert_eq!(unique_destination(root, name, &reserved), root.join("a_2.jpg"));
    }

    #[test]
    fn test_unique_destination_respects_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut reserved = HashSet::new();
        reserved.insert(dir.path().join("b.png"));
        assert_eq!(
            unique_destination(dir.path(), OsStr::new("b.png"), &reserved),
            dir.path().join("b_1.png")
        );
        assert_eq!(
            unique_destination(dir.path(), OsStr::new("noext"), &reserved),
            dir.path().join("noext")
        );
    }

    #[test]
    fn test_confined_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(confined(dir.path(), &["Alex", "a.jpg"]).is_ok());
        assert!(confined(dir.path(), &[".."]).is_err());

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
            assert!(confined(dir.path(), &["link"]).is_err());
        }
    }

    #[test]
    fn test_list_images_excludes_representative() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.PNG", "_representative.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let names: Vec<String> = list_images(dir.path()).unwrap().into_iter().map(|e| e.filename).collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg"]);
        assert_eq!(count_images(&dir.path().join("missing")), 0);
    }
}
