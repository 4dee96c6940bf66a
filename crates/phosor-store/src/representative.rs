//! Representative ("preview") images, one per cluster folder.

use crate::error::StoreError;
use crate::font;
use crate::materialize::MaterializeReport;
use crate::paths::REPRESENTATIVE_FILE;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use phosor_core::{BoundingBox, ClusterSummary, FaceRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pixels added around the face box before cropping.
const FACE_PADDING: i32 = 40;
/// Edge length of the square face crop.
const FACE_SIZE: u32 = 256;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// How a cluster's preview is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativeMode {
    /// Padded face crop, resized to a fixed square.
    #[default]
    Face,
    /// Full image with the face box drawn.
    Bbox,
    /// Full image with the face box and the cluster label.
    BboxLabel,
}

impl FromStr for RepresentativeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "face" | "crop" => Ok(RepresentativeMode::Face),
            "bbox" => Ok(RepresentativeMode::Bbox),
            "bbox_label" | "bbox-label" => Ok(RepresentativeMode::BboxLabel),
            other => Err(format!(
                "unknown representative mode {other:?} (expected face, bbox or bbox_label)"
            )),
        }
    }
}

/// Render the preview for `face` from an already decoded image.
pub fn render(image: &RgbImage, bbox: &BoundingBox, label: &str, mode: RepresentativeMode) -> Result<RgbImage, StoreError> {
    match mode {
        RepresentativeMode::Face => {
            let region = bbox
                .padded_within(FACE_PADDING, image.width(), image.height())
                .ok_or_else(|| StoreError::Render(format!("face box {bbox:?} lies outside the image")))?;
            let crop = imageops::crop_imm(
                image,
                region.x1 as u32,
                region.y1 as u32,
                region.width() as u32,
                region.height() as u32,
            )
            .to_image();
            Ok(imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Triangle))
        }
        RepresentativeMode::Bbox => {
            let mut out = image.clone();
            draw_box(&mut out, bbox);
            Ok(out)
        }
        RepresentativeMode::BboxLabel => {
            let mut out = image.clone();
            draw_box(&mut out, bbox);
            draw_label(&mut out, bbox, label);
            Ok(out)
        }
    }
}

fn line_thickness(image: &RgbImage) -> u32 {
    (image.width().min(image.height()) / 200).max(2)
}

fn fill_rect(image: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Rgb<u8>) {
    for y in y1..y2.min(image.height()) {
        for x in x1..x2.min(image.width()) {
            image.put_pixel(x, y, color);
        }
    }
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let Some(b) = bbox.padded_within(0, image.width(), image.height()) else {
        return;
    };
    let t = line_thickness(image);
    let (x1, y1, x2, y2) = (b.x1 as u32, b.y1 as u32, b.x2 as u32, b.y2 as u32);
    fill_rect(image, x1, y1, x2, y1 + t, BOX_COLOR);
    fill_rect(image, x1, y2.saturating_sub(t), x2, y2, BOX_COLOR);
    fill_rect(image, x1, y1, x1 + t, y2, BOX_COLOR);
    fill_rect(image, x2.saturating_sub(t), y1, x2, y2, BOX_COLOR);
}

fn draw_label(image: &mut RgbImage, bbox: &BoundingBox, label: &str) {
    let scale = (image.width() / 320).max(2);
    let (text_w, text_h) = font::text_size(label, scale);
    let margin = scale * 2;
    let banner_h = text_h + margin * 2;

    let x = bbox.x1.max(0) as u32;
    // Above the box when there is room, otherwise just inside its top edge
    let top = bbox.y1.max(0) as u32;
    let y = if top >= banner_h { top - banner_h } else { top };

    fill_rect(image, x, y, x + text_w + margin * 2, y + banner_h, TEXT_BACKGROUND);
    font::draw_text(image, label, x + margin, y + margin, scale, TEXT_COLOR);
}

/// Counts from one representative pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RepresentativeReport {
    pub written: usize,
    pub failed: usize,
}

/// Write `_representative.jpg` into every cluster folder.
///
/// Each cluster uses its first face in record order. The image is read from
/// its materialized copy when the source is gone (move mode). A cluster that
/// fails is logged and skipped.
pub fn create_cluster_representatives(
    faces: &[FaceRecord],
    summaries: &[ClusterSummary],
    root: &Path,
    mode: RepresentativeMode,
    dry_run: bool,
    placements: Option<&MaterializeReport>,
) -> RepresentativeReport {
    let mut report = RepresentativeReport::default();

    for summary in summaries {
        let Some(face) = faces.iter().find(|f| f.cluster_id == Some(summary.cluster_id)) else {
            tracing::warn!(cluster_id = summary.cluster_id, label = %summary.label, "cluster has no faces; no representative");
            continue;
        };

        let source = resolve_source(face, summary.cluster_id, placements);
        let destination = root.join(&summary.label).join(REPRESENTATIVE_FILE);

        if dry_run {
            tracing::info!(dry_run, label = %summary.label, from = %source.display(), ?mode, "would write representative");
            report.written += 1;
            continue;
        }

        match write_representative(&source, &face.bbox, &summary.label, mode, &destination) {
            Ok(()) => {
                tracing::debug!(label = %summary.label, path = %destination.display(), "wrote representative");
                report.written += 1;
            }
            Err(e) => {
                tracing::error!(label = %summary.label, source = %source.display(), error = %e, "failed to create representative");
                report.failed += 1;
            }
        }
    }

    tracing::info!(written = report.written, failed = report.failed, ?mode, "created representatives");
    report
}

fn resolve_source(face: &FaceRecord, cluster_id: i32, placements: Option<&MaterializeReport>) -> PathBuf {
    if face.image_path.exists() {
        return face.image_path.clone();
    }
    placements
        .and_then(|p| p.placed(cluster_id, &face.image_path))
        .map(Path::to_path_buf)
        .unwrap_or_else(|| face.image_path.clone())
}

/// Decode `source`, render, and save as JPEG at `destination`.
pub fn write_representative(
    source: &Path,
    bbox: &BoundingBox,
    label: &str,
    mode: RepresentativeMode,
    destination: &Path,
) -> Result<(), StoreError> {
    let image = image::open(source)
        .map_err(|e| StoreError::Render(format!("cannot load {}: {e}", source.display())))?
        .to_rgb8();
    let rendered = render(&image, bbox, label, mode)?;
    rendered
        .save(destination)
        .map_err(|e| StoreError::Render(format!("cannot write {}: {e}", destination.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phosor_core::Embedding;

    fn gray(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([128, 128, 128]))
    }

    #[test]
    fn test_face_mode_is_fixed_square() {
        let img = gray(640, 480);
        let out = render(&img, &BoundingBox::new(600, 10, 639, 60), "x", RepresentativeMode::Face).unwrap();
        assert_eq!(out.dimensions(), (FACE_SIZE, FACE_SIZE));
    }

    #[test]
    fn test_face_mode_outside_image_fails() {
        let img = gray(100, 100);
        let err = render(&img, &BoundingBox::new(500, 500, 600, 600), "x", RepresentativeMode::Face).unwrap_err();
        assert!(matches!(err, StoreError::Render(_)));
    }

    #[test]
    fn test_bbox_mode_draws_outline() {
        let img = gray(200, 200);
        let out = render(&img, &BoundingBox::new(50, 50, 150, 150), "x", RepresentativeMode::Bbox).unwrap();
        assert_eq!(out.dimensions(), (200, 200));
        assert_eq!(out.get_pixel(50, 50), &BOX_COLOR);
        assert_eq!(out.get_pixel(100, 100), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_bbox_label_mode_draws_banner() {
        let img = gray(400, 400);
        let out = render(&img, &BoundingBox::new(100, 200, 300, 380), "Person_01", RepresentativeMode::BboxLabel).unwrap();
        // Banner background sits directly above the box
        assert_eq!(out.get_pixel(101, 199), &TEXT_BACKGROUND);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("bbox_label".parse::<RepresentativeMode>().unwrap(), RepresentativeMode::BboxLabel);
        assert_eq!("face".parse::<RepresentativeMode>().unwrap(), RepresentativeMode::Face);
        assert!("sketch".parse::<RepresentativeMode>().is_err());
    }

    #[test]
    fn test_create_representatives_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let good = root.join("good.png");
        gray(120, 120).save(&good).unwrap();
        std::fs::create_dir_all(root.join("Person_01")).unwrap();
        std::fs::create_dir_all(root.join("Person_02")).unwrap();

        let face = |id: u64, path: PathBuf, cluster_id: i32| FaceRecord {
            id,
            image_path: path,
            face_index: 0,
            bbox: BoundingBox::new(10, 10, 60, 60),
            embedding: Embedding::new(vec![1.0]),
            cluster_id: Some(cluster_id),
        };
        let faces = vec![face(1, root.join("missing.jpg"), 0), face(2, good, 1)];
        let summaries = vec![
            ClusterSummary { cluster_id: 0, label: "Person_01".into(), num_faces: 1, sample_images: vec![] },
            ClusterSummary { cluster_id: 1, label: "Person_02".into(), num_faces: 1, sample_images: vec![] },
        ];

        let report = create_cluster_representatives(&faces, &summaries, root, RepresentativeMode::Face, false, None);
        assert_eq!(report, RepresentativeReport { written: 1, failed: 1 });
        assert!(root.join("Person_02").join(REPRESENTATIVE_FILE).exists());
        assert!(!root.join("Person_01").join(REPRESENTATIVE_FILE).exists());
    }
}
