//! Per-frame annotation records as written by the labeling tool.
//!
//! Only the minimal schema consumed by the builders is modelled:
//!
//! ```json
//! {
//!   "shapes": [{"label": "3", "points": [[10, 10], [50, 90]]}],
//!   "imageWidth": 640,
//!   "imageHeight": 480
//! }
//! ```
//!
//! Any other field is ignored.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::Deserialize;

use crate::config::LabelPolicy;
use crate::geometry::BBox;
use crate::{Error, Result};

/// Largest absolute point coordinate accepted, in pixels.
pub const MAX_COORDINATE: f64 = 1e9;

/// One labeled shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Shape {
    pub label: String,
    #[serde(default)]
    pub points: Vec<Vec<f64>>,
}

/// One annotation file, i.e. one frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnotationRecord {
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(rename = "imageWidth", default)]
    pub image_width: Option<u32>,
    #[serde(rename = "imageHeight", default)]
    pub image_height: Option<u32>,
}

/// A shape that passed label parsing: its raw label text, the parsed
/// identity label and the normalized box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledBox {
    pub raw_label: String,
    pub label: u32,
    pub bbox: BBox,
}

/// Parse a shape label into an identity label under the given policy.
///
/// Returns `None` for labels that do not denote an identity (team codes,
/// jersey numbers with suffixes, negative or non-numeric text).
pub fn parse_label(label: &str, policy: LabelPolicy) -> Option<u32> {
    let digits = match policy {
        LabelPolicy::Digits => label,
        LabelPolicy::NumericPrefix => {
            if label.contains("j_") {
                return None;
            }
            label.split('_').next().unwrap_or("")
        }
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl Shape {
    /// The normalized box spanned by the first two points.
    pub fn bbox(&self) -> Result<BBox> {
        if self.points.len() < 2 {
            return Err(Error::MalformedAnnotation(format!(
                "shape '{}' has {} point(s), expected 2",
                self.label,
                self.points.len()
            )));
        }
        let corner = |p: &Vec<f64>| -> Result<[f64; 2]> {
            match p.as_slice() {
                [x, y, ..] if x.abs() <= MAX_COORDINATE && y.abs() <= MAX_COORDINATE => Ok([*x, *y]),
                _ => Err(Error::MalformedAnnotation(format!(
                    "shape '{}' has an invalid point {:?}",
                    self.label, p
                ))),
            }
        };
        Ok(BBox::from_points(corner(&self.points[0])?, corner(&self.points[1])?))
    }

    /// Convert to a [`LabeledBox`].
    ///
    /// `Ok(None)` means the label is not an identity label and the shape is
    /// ignored; `Err` means the shape is malformed.
    pub fn to_labeled_box(&self, policy: LabelPolicy) -> Result<Option<LabeledBox>> {
        let Some(label) = parse_label(&self.label, policy) else {
            return Ok(None);
        };
        let bbox = self.bbox()?;
        Ok(Some(LabeledBox {
            raw_label: self.label.clone(),
            label,
            bbox,
        }))
    }
}

impl AnnotationRecord {
    /// Read and parse an annotation file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to read annotation '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json(&text).map_err(|e| {
            Error::MalformedAnnotation(format!("'{}': {}", path.display(), e))
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Identity-labeled boxes of this frame whose label lies in `allowed`.
    ///
    /// Malformed shapes are skipped with a warning; shapes without an identity
    /// label or outside the allowed range are skipped silently (debug log).
    pub fn labeled_boxes(
        &self,
        policy: LabelPolicy,
        allowed: &RangeInclusive<u32>,
        source: &Path,
    ) -> Vec<LabeledBox> {
        let mut boxes = Vec::with_capacity(self.shapes.len());
        for shape in &self.shapes {
            match shape.to_labeled_box(policy) {
                Ok(Some(labeled)) if allowed.contains(&labeled.label) => boxes.push(labeled),
                Ok(Some(labeled)) => {
                    log::debug!(
                        "{}: label {} outside allowed range {:?}",
                        source.display(),
                        labeled.raw_label,
                        allowed
                    );
                }
                Ok(None) => {
                    log::debug!("{}: ignoring label '{}'", source.display(), shape.label);
                }
                Err(e) => log::warn!("{}: skipping shape: {}", source.display(), e),
            }
        }
        boxes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source() -> PathBuf {
        PathBuf::from("anno/seq/000001.json")
    }

    #[test]
    fn test_parse_digits() {
        assert_eq!(parse_label("3", LabelPolicy::Digits), Some(3));
        assert_eq!(parse_label("012", LabelPolicy::Digits), Some(12));
        assert_eq!(parse_label("-3", LabelPolicy::Digits), None);
        assert_eq!(parse_label("3_home", LabelPolicy::Digits), None);
        assert_eq!(parse_label("j_23", LabelPolicy::Digits), None);
        assert_eq!(parse_label("", LabelPolicy::Digits), None);
        assert_eq!(parse_label("99999999999999", LabelPolicy::Digits), None);
    }

    #[test]
    fn test_parse_numeric_prefix() {
        assert_eq!(parse_label("7_home", LabelPolicy::NumericPrefix), Some(7));
        assert_eq!(parse_label("7", LabelPolicy::NumericPrefix), Some(7));
        assert_eq!(parse_label("7_j_23", LabelPolicy::NumericPrefix), None);
        assert_eq!(parse_label("team_7", LabelPolicy::NumericPrefix), None);
    }

    #[test]
    fn test_parse_record() {
        let record = AnnotationRecord::from_json(
            r#"{
                "version": "5.0.1",
                "shapes": [{"label": "3", "points": [[10, 10], [50, 90]], "shape_type": "rectangle"}],
                "imagePath": "000001.jpg",
                "imageWidth": 640,
                "imageHeight": 480
            }"#,
        )
        .unwrap();

        assert_eq!(record.image_width, Some(640));
        assert_eq!(record.image_height, Some(480));
        let boxes = record.labeled_boxes(LabelPolicy::Digits, &(0..=12), &source());
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].label, 3);
        assert_eq!(boxes[0].bbox, BBox { x1: 10, y1: 10, x2: 50, y2: 90 });
    }

    #[test]
    fn test_malformed_shape_is_skipped_alone() {
        let record = AnnotationRecord::from_json(
            r#"{"shapes": [
                {"label": "1", "points": [[10, 10]]},
                {"label": "2", "points": [[0, 0], [20, 20]]},
                {"label": "3", "points": [[0, 0], [5]]}
            ]}"#,
        )
        .unwrap();

        let boxes = record.labeled_boxes(LabelPolicy::Digits, &(0..=12), &source());
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].label, 2);
    }

    #[test]
    fn test_label_range_and_non_identity_labels() {
        let record = AnnotationRecord::from_json(
            r#"{"shapes": [
                {"label": "0", "points": [[0, 0], [20, 20]]},
                {"label": "13", "points": [[0, 0], [20, 20]]},
                {"label": "j_5", "points": [[0, 0], [20, 20]]},
                {"label": "12", "points": [[0, 0], [20, 20]]}
            ]}"#,
        )
        .unwrap();

        let boxes = record.labeled_boxes(LabelPolicy::Digits, &(1..=12), &source());
        let labels: Vec<u32> = boxes.iter().map(|b| b.label).collect();
        assert_eq!(labels, vec![12]);
    }

    #[test]
    fn test_missing_shapes_field() {
        let record = AnnotationRecord::from_json("{}").unwrap();
        assert!(record.shapes.is_empty());
        assert_eq!(record.image_width, None);
    }

    #[test]
    fn test_invalid_json() {
        assert!(AnnotationRecord::from_json("{not json").is_err());
    }

    #[test]
    fn test_out_of_range_point_is_malformed() {
        let record = AnnotationRecord::from_json(
            r#"{"shapes": [
                {"label": "1", "points": [[-1e300, 0], [1e300, 10]]},
                {"label": "2", "points": [[0, 0], [20, 20]]}
            ]}"#,
        )
        .unwrap();

        assert!(matches!(
            record.shapes[0].bbox(),
            Err(Error::MalformedAnnotation(_))
        ));
        let boxes = record.labeled_boxes(LabelPolicy::Digits, &(0..=12), &source());
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].label, 2);
    }
}
