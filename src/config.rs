//! Builder configuration.
//!
//! Every policy knob of the pipeline lives here: path substitution rules,
//! label filtering, identity blocks, overlap thresholds, split fractions and
//! the MOT / YOLO output conventions. All structs implement `Default` and
//! deserialize with `#[serde(default)]`, so a JSON file only needs to name
//! the fields it overrides.

use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mapping between an annotation folder and its frame folder.
///
/// A path component equal to `annotation_dir` is replaced by `image_dir`, and
/// the annotation extension by each of `image_exts` in turn until an existing
/// image is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub annotation_dir: String,
    pub image_dir: String,
    #[serde(default = "default_annotation_ext")]
    pub annotation_ext: String,
    #[serde(default = "default_image_exts")]
    pub image_exts: Vec<String>,
}

fn default_annotation_ext() -> String {
    "json".to_string()
}

fn default_image_exts() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

impl PathRule {
    pub fn new(annotation_dir: &str, image_dir: &str) -> Self {
        Self {
            annotation_dir: annotation_dir.to_string(),
            image_dir: image_dir.to_string(),
            annotation_ext: default_annotation_ext(),
            image_exts: default_image_exts(),
        }
    }
}

/// Which shape labels count as identity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Only base-10 non-negative integer strings, e.g. `"7"`.
    #[default]
    Digits,
    /// The integer before the first `_`, e.g. `"7_home"`; jersey codes
    /// containing `j_` are ignored.
    NumericPrefix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Number of raw labels reserved per source folder.
    pub block_size: u32,
    /// Offset given to the first source folder.
    pub start_id: u32,
    /// Optional JSON table of folder offsets, loaded before and saved after a run.
    pub table_path: Option<PathBuf>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            block_size: 13,
            start_id: 0,
            table_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapConfig {
    /// Boxes whose max intersection-over-foreground exceeds this are rejected.
    pub max_iof: f64,
    /// Minimum crop width and height in pixels.
    pub min_size: i64,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            max_iof: 0.2,
            min_size: 2,
        }
    }
}

/// Final arrangement of the partitioned ReID dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitLayout {
    /// `<root>/<dataset>/<split>/<crop>`, identity encoded in the file name.
    #[default]
    Flat,
    /// `<root>/<dataset>/<global_id>/<split>/<crop>`.
    PerIdentity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of each identity's crops held out from training.
    pub held_out_fraction: f64,
    /// Fraction of the held-out crops that become gallery (`bounding_box_test`);
    /// the rest become `query`.
    pub gallery_fraction: f64,
    pub seed: u64,
    pub dataset_name: String,
    pub layout: SplitLayout,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            held_out_fraction: 0.1,
            gallery_fraction: 0.45,
            seed: 42,
            dataset_name: "market1501".to_string(),
            layout: SplitLayout::Flat,
        }
    }
}

/// How the label column of `gt.txt` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotLabelEncoding {
    /// The annotation label verbatim, e.g. `"07"`.
    Raw,
    /// The absolute integer value, e.g. `7`.
    #[default]
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotConfig {
    pub label_encoding: MotLabelEncoding,
    /// Sequences are named `{prefix}-{NN}`.
    pub sequence_prefix: String,
    /// Copy frame images into `img1/`.
    pub copy_frames: bool,
    pub frame_rate: u32,
}

impl Default for MotConfig {
    fn default() -> Self {
        Self {
            label_encoding: MotLabelEncoding::Absolute,
            sequence_prefix: "ncaa_dataset".to_string(),
            copy_frames: true,
            frame_rate: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloConfig {
    /// Fraction of all frames put into `test`.
    pub test_fraction: f64,
    /// Fraction of the remaining frames put into `valid`.
    pub valid_fraction: f64,
    pub seed: u64,
    /// Emit at most one line per distinct label in a frame.
    pub unique_labels: bool,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            valid_fraction: 0.2,
            seed: 42,
            unique_labels: true,
        }
    }
}

/// Configuration for all builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub path_rules: Vec<PathRule>,
    pub label_policy: LabelPolicy,
    /// Inclusive range of accepted raw labels. Defaults to `0..block_size`.
    pub label_range: Option<(u32, u32)>,
    pub identity: IdentityConfig,
    pub overlap: OverlapConfig,
    pub split: SplitConfig,
    /// Extension (and encoder) of written crops.
    pub crop_ext: String,
    /// Crop writer threads, 0 for the rayon default.
    pub workers: usize,
    /// Log progress every this many frames.
    pub progress_every: usize,
    pub mot: MotConfig,
    pub yolo: YoloConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            path_rules: vec![
                PathRule::new("anno", "frames"),
                PathRule::new("anno", "playerTrackingFrames"),
                PathRule::new("third_task", "playerTrackingFrames2"),
            ],
            label_policy: LabelPolicy::Digits,
            label_range: None,
            identity: IdentityConfig::default(),
            overlap: OverlapConfig::default(),
            split: SplitConfig::default(),
            crop_ext: "jpg".to_string(),
            workers: 0,
            progress_every: 500,
            mot: MotConfig::default(),
            yolo: YoloConfig::default(),
        }
    }
}

impl BuilderConfig {
    /// Load a (partial) configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Raw labels that take part in overlap resolution and identity assignment.
    pub fn allowed_labels(&self) -> RangeInclusive<u32> {
        match self.label_range {
            Some((lo, hi)) => lo..=hi,
            None => 0..=self.identity.block_size.saturating_sub(1),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path_rules.is_empty() {
            return Err(Error::InvalidConfig("at least one path rule is required".to_string()));
        }
        for rule in &self.path_rules {
            if rule.annotation_dir.is_empty() || rule.image_dir.is_empty() {
                return Err(Error::InvalidConfig(
                    "path rule folder names must not be empty".to_string(),
                ));
            }
            if rule.annotation_dir == rule.image_dir {
                return Err(Error::InvalidConfig(format!(
                    "path rule maps '{}' onto itself",
                    rule.annotation_dir
                )));
            }
            if rule.image_exts.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "path rule '{}' has no image extensions",
                    rule.annotation_dir
                )));
            }
        }

        if self.identity.block_size == 0 {
            return Err(Error::InvalidConfig("identity block_size must be positive".to_string()));
        }
        if let Some((lo, hi)) = self.label_range {
            if lo > hi {
                return Err(Error::InvalidConfig(format!("empty label range {}..={}", lo, hi)));
            }
            if hi >= self.identity.block_size {
                return Err(Error::InvalidConfig(format!(
                    "label range upper bound {} does not fit in block_size {}",
                    hi, self.identity.block_size
                )));
            }
        }

        if self.label_policy == LabelPolicy::NumericPrefix
            && self.mot.label_encoding == MotLabelEncoding::Raw
        {
            return Err(Error::InvalidConfig(
                "raw MOT labels need the digits label policy; numeric_prefix labels are not integers"
                    .to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.overlap.max_iof) {
            return Err(Error::InvalidConfig("max_iof must be within [0, 1]".to_string()));
        }
        if self.overlap.min_size < 1 {
            return Err(Error::InvalidConfig("min_size must be at least 1".to_string()));
        }

        for (name, value) in [
            ("held_out_fraction", self.split.held_out_fraction),
            ("gallery_fraction", self.split.gallery_fraction),
            ("yolo.test_fraction", self.yolo.test_fraction),
            ("yolo.valid_fraction", self.yolo.valid_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!("{} must be within [0, 1]", name)));
            }
        }
        if self.split.dataset_name.is_empty() {
            return Err(Error::InvalidConfig("dataset_name must not be empty".to_string()));
        }
        if self.crop_ext.is_empty() {
            return Err(Error::InvalidConfig("crop_ext must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        let config = BuilderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allowed_labels(), 0..=12);
    }

    #[test]
    fn test_label_range_override() {
        let config = BuilderConfig {
            label_range: Some((1, 12)),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.allowed_labels(), 1..=12);
    }

    #[test]
    fn test_label_range_must_fit_block() {
        let config = BuilderConfig {
            label_range: Some((1, 13)),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_fractions() {
        let mut config = BuilderConfig::default();
        config.split.held_out_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = BuilderConfig::default();
        config.overlap.max_iof = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_raw_mot_labels_need_digit_policy() {
        let mut config = BuilderConfig::default();
        config.label_policy = LabelPolicy::NumericPrefix;
        assert!(config.validate().is_ok());

        config.mot.label_encoding = MotLabelEncoding::Raw;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.label_policy = LabelPolicy::Digits;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "overlap": {{"max_iof": 0.5}},
                "mot": {{"label_encoding": "raw"}},
                "path_rules": [{{"annotation_dir": "labels", "image_dir": "images"}}]
            }}"#
        )
        .unwrap();

        let config = BuilderConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.overlap.max_iof, 0.5);
        assert_eq!(config.overlap.min_size, 2);
        assert_eq!(config.mot.label_encoding, MotLabelEncoding::Raw);
        assert_eq!(config.path_rules.len(), 1);
        assert_eq!(config.path_rules[0].image_exts, vec!["jpg", "jpeg", "png"]);
        assert_eq!(config.split.seed, 42);
    }

    #[test]
    fn test_missing_config_file() {
        let result = BuilderConfig::from_json_file("/nonexistent/config.json");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
