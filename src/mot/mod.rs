//! MOTChallenge ground truth for annotated sequences.
//!
//! Every source folder becomes one sequence:
//!
//! ```text
//! <output>/<prefix>-01/img1/000001.jpg
//! <output>/<prefix>-01/gt/gt.txt
//! <output>/<prefix>-01/seqinfo.ini
//! ```
//!
//! Frames are the folder's images in file name order. A frame without an
//! annotation writes no lines but still takes its frame index.
//!
//! Sequence numbers follow the sorted folder order, so a folder added later
//! can shift them. `seqinfo.ini` records the source folder and a sequence is
//! only reused by a rerun when it was built from the same folder.

mod ground_truth;
mod sequence_info;

pub use ground_truth::{frame_detections, GroundTruthFile, GroundTruthWriter, MotDetection};
pub use sequence_info::SequenceInfo;

use std::fs;
use std::path::{Path, PathBuf};

use crate::annotation::AnnotationRecord;
use crate::config::BuilderConfig;
use crate::discovery::{discover, Frame, SourceFolder};
use crate::utils::ensure_dir;
use crate::Result;

/// Outcome of one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSummary {
    pub name: String,
    pub path: PathBuf,
    pub frames: usize,
    pub detections: usize,
    /// The sequence was complete from an earlier run and left untouched.
    pub skipped: bool,
}

/// Outcome of [`MotBuilder::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotSummary {
    pub sequences: Vec<SequenceSummary>,
}

impl MotSummary {
    pub fn frames(&self) -> usize {
        self.sequences.iter().map(|s| s.frames).sum()
    }

    pub fn detections(&self) -> usize {
        self.sequences.iter().map(|s| s.detections).sum()
    }

    pub fn skipped(&self) -> usize {
        self.sequences.iter().filter(|s| s.skipped).count()
    }
}

/// Writes one MOT sequence per source folder.
#[derive(Debug, Clone)]
pub struct MotBuilder {
    config: BuilderConfig,
}

impl MotBuilder {
    pub fn new(config: BuilderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Name of the `index`-th (0-based) sequence.
    pub fn sequence_name(&self, index: usize) -> String {
        format!("{}-{:02}", self.config.mot.sequence_prefix, index + 1)
    }

    /// Build all sequences of `input` below `output`.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<MotSummary> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let folders = discover(input, &self.config.path_rules)?;
        ensure_dir(output)?;

        let mut summary = MotSummary::default();
        for (index, folder) in folders.iter().enumerate() {
            let name = self.sequence_name(index);
            let sequence_dir = output.join(&name);
            match self.build_sequence(folder, &name, &sequence_dir) {
                Ok(Some(sequence)) => summary.sequences.push(sequence),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping sequence {} ({}): {}", name, folder.key, e),
            }
        }

        log::info!(
            "Wrote {} sequence(s) with {} frames and {} detections ({} already complete)",
            summary.sequences.len(),
            summary.frames(),
            summary.detections(),
            summary.skipped()
        );
        Ok(summary)
    }

    /// Write one sequence. Returns `None` when the folder has no frames.
    pub fn build_sequence(
        &self,
        folder: &SourceFolder,
        name: &str,
        sequence_dir: &Path,
    ) -> Result<Option<SequenceSummary>> {
        let frames = folder.image_frames()?;
        if frames.is_empty() {
            log::warn!(
                "{}: no frames in {}, skipping",
                folder.key,
                folder.image_dir.display()
            );
            return Ok(None);
        }

        if let Some(detections) = complete_sequence(sequence_dir, &folder.key, frames.len()) {
            log::info!("Sequence {} is complete, skipping", name);
            return Ok(Some(SequenceSummary {
                name: name.to_string(),
                path: sequence_dir.to_path_buf(),
                frames: frames.len(),
                detections,
                skipped: true,
            }));
        }

        log::info!("Building sequence {} from {} ({} frames)", name, folder.key, frames.len());
        ensure_dir(sequence_dir)?;
        let image_dir = sequence_dir.join("img1");
        if image_dir.is_dir() {
            // Stale frames of an earlier, different sequence.
            fs::remove_dir_all(&image_dir)?;
        }
        if self.config.mot.copy_frames {
            ensure_dir(&image_dir)?;
        }

        let mut writer = GroundTruthWriter::new(sequence_dir)?;
        let mut annotation_size = None;
        for frame in &frames {
            let frame_number = writer.frame_number();
            if self.config.mot.copy_frames {
                copy_frame(frame, frame_number, &image_dir)?;
            }

            let detections = match self.read_frame(frame, frame_number) {
                Some(record) => {
                    if annotation_size.is_none() {
                        annotation_size = record.image_width.zip(record.image_height);
                    }
                    frame_detections(
                        &record,
                        frame_number,
                        self.config.label_policy,
                        self.config.mot.label_encoding,
                    )
                }
                None => Vec::new(),
            };
            writer.update(&detections)?;

            if self.config.progress_every > 0 && frame_number % self.config.progress_every == 0 {
                log::info!("{}: {}/{} frames", name, frame_number, frames.len());
            }
        }
        writer.flush()?;

        let first_image = frames.iter().find_map(|f| f.image.as_deref());
        let image_size = first_image
            .and_then(|path| match image::image_dimensions(path) {
                Ok(size) => Some(size),
                Err(e) => {
                    log::warn!("Cannot read size of {}: {}", path.display(), e);
                    None
                }
            })
            .or(annotation_size);
        let im_ext = first_image
            .and_then(|path| path.extension())
            .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()));

        SequenceInfo {
            name: name.to_string(),
            im_dir: "img1".to_string(),
            frame_rate: self.config.mot.frame_rate,
            seq_length: frames.len(),
            image_size,
            im_ext,
            source: Some(folder.key.clone()),
        }
        .write(sequence_dir.join("seqinfo.ini"))?;

        Ok(Some(SequenceSummary {
            name: name.to_string(),
            path: sequence_dir.to_path_buf(),
            frames: frames.len(),
            detections: writer.lines(),
            skipped: false,
        }))
    }

    fn read_frame(&self, frame: &Frame, frame_number: usize) -> Option<AnnotationRecord> {
        let path = frame.annotation.as_ref()?;
        match AnnotationRecord::from_file(path) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Frame {} has an unreadable annotation: {}", frame_number, e);
                None
            }
        }
    }
}

/// Number of detections of a sequence that an earlier run finished from the
/// same source folder, if any.
fn complete_sequence(sequence_dir: &Path, source: &str, seq_length: usize) -> Option<usize> {
    let info = SequenceInfo::read(sequence_dir.join("seqinfo.ini")).ok()?;
    if info.seq_length != seq_length {
        return None;
    }
    if info.source.as_deref() != Some(source) {
        log::info!(
            "{} was built from {}, rebuilding from {}",
            sequence_dir.display(),
            info.source.as_deref().unwrap_or("an unknown folder"),
            source
        );
        return None;
    }
    let gt = GroundTruthFile::read(sequence_dir.join("gt").join("gt.txt"), Some(seq_length)).ok()?;
    Some(gt.num_detections())
}

fn copy_frame(frame: &Frame, frame_number: usize, image_dir: &Path) -> Result<()> {
    let Some(source) = &frame.image else {
        return Ok(());
    };
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    fs::copy(source, image_dir.join(format!("{:06}.{}", frame_number, ext)))?;
    Ok(())
}
