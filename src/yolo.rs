//! YOLO detection dataset export.
//!
//! All frames that have an image are shuffled with a fixed seed and split into
//! `test`, `valid` and `train`. Each frame is copied to
//! `<output>/<split>/images/<folder>-<file>` and, when annotated, gets a label
//! file `<output>/<split>/labels/<folder>-<stem>.txt` with one line per
//! identity box:
//!
//! ```text
//! 0 <x_center> <y_center> <width> <height>
//! ```
//!
//! Coordinates are normalized by the annotation's `imageWidth`/`imageHeight`.
//! All identities share class `0`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::annotation::{parse_label, AnnotationRecord};
use crate::config::{BuilderConfig, YoloConfig};
use crate::discovery::{discover, Frame};
use crate::partition::ceil_fraction;
use crate::utils::{ensure_dir, file_name, warn_once};
use crate::Result;

/// The three detection subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum YoloSplit {
    Train,
    Valid,
    Test,
}

impl YoloSplit {
    pub const ALL: [YoloSplit; 3] = [YoloSplit::Train, YoloSplit::Valid, YoloSplit::Test];

    pub fn dir_name(&self) -> &'static str {
        match self {
            YoloSplit::Train => "train",
            YoloSplit::Valid => "valid",
            YoloSplit::Test => "test",
        }
    }
}

/// A frame selected for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoloSample {
    /// Prefix identifying the source folder in exported file names.
    pub prefix: String,
    pub image: PathBuf,
    pub annotation: Option<PathBuf>,
}

impl YoloSample {
    pub fn image_name(&self) -> String {
        format!("{}-{}", self.prefix, file_name(&self.image))
    }

    pub fn label_name(&self) -> String {
        let stem = self
            .image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}-{}.txt", self.prefix, stem)
    }
}

/// Sample counts per split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YoloSummary {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
    pub labels: usize,
}

impl YoloSummary {
    pub fn total(&self) -> usize {
        self.train + self.valid + self.test
    }
}

/// `(train, valid, test)` sizes for `n` frames.
///
/// `test` is `ceil(n * test_fraction)`, `valid` is `ceil(rest * valid_fraction)`.
pub fn yolo_split_counts(n: usize, config: &YoloConfig) -> (usize, usize, usize) {
    let test = ceil_fraction(n, config.test_fraction);
    let valid = ceil_fraction(n - test, config.valid_fraction);
    (n - test - valid, valid, test)
}

/// Seeded assignment of samples to splits, in input order within a split.
pub fn split_samples(samples: Vec<YoloSample>, config: &YoloConfig) -> Vec<(YoloSplit, YoloSample)> {
    let mut samples = samples;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    samples.shuffle(&mut rng);

    let (_, valid, test) = yolo_split_counts(samples.len(), config);
    samples
        .into_iter()
        .enumerate()
        .map(|(i, sample)| {
            let split = if i < test {
                YoloSplit::Test
            } else if i < test + valid {
                YoloSplit::Valid
            } else {
                YoloSplit::Train
            };
            (split, sample)
        })
        .collect()
}

/// Label lines of one annotation record.
///
/// `fallback_size` is used when the record lacks `imageWidth`/`imageHeight`.
/// Returns `None` when no image size is known at all.
pub fn label_lines(
    record: &AnnotationRecord,
    config: &BuilderConfig,
    fallback_size: Option<(u32, u32)>,
) -> Option<Vec<String>> {
    let (width, height) = record
        .image_width
        .zip(record.image_height)
        .or(fallback_size)
        .filter(|&(w, h)| w > 0 && h > 0)?;

    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for shape in &record.shapes {
        if parse_label(&shape.label, config.label_policy).is_none() {
            continue;
        }
        if config.yolo.unique_labels && !seen.insert(shape.label.as_str()) {
            continue;
        }
        let Ok(bbox) = shape.bbox() else {
            log::debug!("Skipping malformed shape '{}'", shape.label);
            continue;
        };
        let (xc, yc, w, h) = bbox.to_normalized_xywh(f64::from(width), f64::from(height));
        lines.push(format!("0 {} {} {} {}", xc, yc, w, h));
    }
    Some(lines)
}

/// Exports frames and labels for detector training.
#[derive(Debug, Clone)]
pub struct YoloBuilder {
    config: BuilderConfig,
}

impl YoloBuilder {
    pub fn new(config: BuilderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Every frame with an image, in folder then file name order.
    pub fn collect_samples(&self, input: &Path) -> Result<Vec<YoloSample>> {
        let mut samples = Vec::new();
        for folder in discover(input, &self.config.path_rules)? {
            let prefix = folder.flat_name();
            for Frame {
                image, annotation, ..
            } in folder.image_frames()?
            {
                if let Some(image) = image {
                    samples.push(YoloSample {
                        prefix: prefix.clone(),
                        image,
                        annotation,
                    });
                }
            }
        }
        Ok(samples)
    }

    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<YoloSummary> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let samples = self.collect_samples(input)?;
        log::info!("Exporting {} frame(s) to {}", samples.len(), output.display());

        for split in YoloSplit::ALL {
            ensure_dir(output.join(split.dir_name()).join("images"))?;
            ensure_dir(output.join(split.dir_name()).join("labels"))?;
        }

        let assigned = split_samples(samples, &self.config.yolo);
        let written: Vec<(YoloSplit, bool)> = assigned
            .par_iter()
            .filter_map(|(split, sample)| match self.export_sample(output, *split, sample) {
                Ok(labeled) => Some((*split, labeled)),
                Err(e) => {
                    log::warn!("Skipping frame {}: {}", sample.image.display(), e);
                    None
                }
            })
            .collect();

        let mut summary = YoloSummary::default();
        for (split, labeled) in written {
            match split {
                YoloSplit::Train => summary.train += 1,
                YoloSplit::Valid => summary.valid += 1,
                YoloSplit::Test => summary.test += 1,
            }
            if labeled {
                summary.labels += 1;
            }
        }

        log::info!(
            "YOLO dataset: {} train, {} valid, {} test, {} label file(s)",
            summary.train,
            summary.valid,
            summary.test,
            summary.labels
        );
        Ok(summary)
    }

    /// Copy one frame and write its label file. Returns whether a label file
    /// was written.
    fn export_sample(&self, output: &Path, split: YoloSplit, sample: &YoloSample) -> Result<bool> {
        let split_dir = output.join(split.dir_name());
        fs::copy(&sample.image, split_dir.join("images").join(sample.image_name()))?;

        let Some(annotation) = &sample.annotation else {
            return Ok(false);
        };
        let record = match AnnotationRecord::from_file(annotation) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("{}", e);
                return Ok(false);
            }
        };

        let fallback_size = if record.image_width.is_none() || record.image_height.is_none() {
            warn_once("annotations without imageWidth/imageHeight, reading sizes from frames");
            image::image_dimensions(&sample.image).ok()
        } else {
            None
        };
        let Some(lines) = label_lines(&record, &self.config, fallback_size) else {
            log::warn!("{}: image size unknown, no labels written", annotation.display());
            return Ok(false);
        };

        fs::write(split_dir.join("labels").join(sample.label_name()), lines.join("\n"))?;
        Ok(true)
    }
}
