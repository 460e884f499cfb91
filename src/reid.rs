//! ReID dataset builder.
//!
//! Runs the full pipeline over an input tree:
//!
//! 1. discover source folders (sorted by key),
//! 2. per frame, parse the annotation, filter labels and resolve overlaps,
//! 3. resolve global identities and number the crops (sequential),
//! 4. write the crops of a folder in parallel,
//! 5. write the `dataset.txt` manifest and partition the identities.
//!
//! Only an unreadable input root, an invalid configuration or an unwritable
//! output root abort a run; everything else is skipped with a warning.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotation::AnnotationRecord;
use crate::config::BuilderConfig;
use crate::crops::{CropExtractor, CropJob, FrameCrops};
use crate::discovery::{discover, Frame, SourceFolder};
use crate::geometry::BBox;
use crate::identity::IdentityResolver;
use crate::overlap::OverlapResolver;
use crate::partition::{ApplySummary, PartitionPlan, Partitioner};
use crate::utils::{ensure_dir, file_name};
use crate::{Error, Result};

/// Name of the crop manifest written below the output root.
pub const MANIFEST_NAME: &str = "dataset.txt";

/// Counters of one [`ReidBuilder::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReidSummary {
    pub folders: usize,
    /// Folders whose frames could not be listed.
    pub skipped_folders: usize,
    pub frames: usize,
    /// Frames without image or with an unreadable annotation.
    pub skipped_frames: usize,
    /// Identity-labeled boxes within the allowed range.
    pub boxes: usize,
    /// Boxes rejected by overlap, size or identity resolution.
    pub rejected: usize,
    pub crops: usize,
    pub identities: usize,
    pub plan: PartitionPlan,
    pub partition: ApplySummary,
    pub manifest: PathBuf,
}

/// Builds a partitioned ReID dataset from annotated frames.
#[derive(Debug)]
pub struct ReidBuilder {
    config: BuilderConfig,
    identities: IdentityResolver,
    overlap: OverlapResolver,
    next_crop_index: u64,
}

impl ReidBuilder {
    /// Validate the configuration and load the identity table if one is
    /// configured.
    pub fn new(config: BuilderConfig) -> Result<Self> {
        config.validate()?;
        let identities = IdentityResolver::load_or_new(&config.identity)?;
        let overlap = OverlapResolver::new(&config.overlap);
        Ok(Self {
            config,
            identities,
            overlap,
            next_crop_index: 0,
        })
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    /// Crop jobs of one frame.
    ///
    /// Returns `None` when the frame has to be skipped as a whole. Increments
    /// `summary.boxes` / `summary.rejected`.
    pub fn plan_frame(
        &mut self,
        folder: &SourceFolder,
        frame: &Frame,
        summary: &mut ReidSummary,
    ) -> Option<FrameCrops> {
        let annotation = frame.annotation.as_deref()?;
        let Some(image) = frame.image.clone() else {
            log::warn!(
                "{}",
                Error::MissingAsset(format!(
                    "no frame for {} in {}",
                    annotation.display(),
                    folder.image_dir.display()
                ))
            );
            return None;
        };
        let record = match AnnotationRecord::from_file(annotation) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Skipping frame: {}", e);
                return None;
            }
        };

        let labeled = record.labeled_boxes(
            self.config.label_policy,
            &self.config.allowed_labels(),
            annotation,
        );
        summary.boxes += labeled.len();
        let boxes: Vec<BBox> = labeled.iter().map(|b| b.bbox).collect();
        let verdict = self.overlap.resolve(&boxes);
        for (index, reason) in &verdict.rejected {
            log::debug!(
                "{}: rejecting label {} {}: {:?}",
                annotation.display(),
                labeled[*index].raw_label,
                labeled[*index].bbox,
                reason
            );
        }
        summary.rejected += verdict.rejected.len();

        let mut jobs = Vec::with_capacity(verdict.accepted.len());
        for &index in &verdict.accepted {
            let labeled_box = &labeled[index];
            let global_id = match self.identities.resolve(&folder.key, labeled_box.label) {
                Ok(global_id) => global_id,
                Err(e) => {
                    log::warn!("{}: {}", annotation.display(), e);
                    summary.rejected += 1;
                    continue;
                }
            };
            jobs.push(CropJob {
                global_id,
                raw_label: labeled_box.label,
                folder_ordinal: self.identities.folder_ordinal(&folder.key).unwrap_or(1),
                crop_index: self.next_crop_index,
                bbox: labeled_box.bbox,
            });
            self.next_crop_index += 1;
        }

        Some(FrameCrops { image, jobs })
    }

    /// Build the dataset of `input` below `output`.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&mut self, input: P, output: Q) -> Result<ReidSummary> {
        let folders = discover(input.as_ref(), &self.config.path_rules)?;
        self.build(&folders, output.as_ref())
    }

    /// Build the dataset of already discovered `folders` below `output`.
    ///
    /// A folder whose frames cannot be listed is skipped with a warning.
    pub fn build(&mut self, folders: &[SourceFolder], output: &Path) -> Result<ReidSummary> {
        ensure_dir(output)?;

        let pool = if self.config.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
                .map_err(|e| Error::InvalidConfig(format!("cannot start crop workers: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        let extractor = CropExtractor::new(output, &self.config.crop_ext, self.config.overlap.min_size);
        let mut summary = ReidSummary {
            folders: folders.len(),
            ..Default::default()
        };
        let mut written = Vec::new();

        for folder in folders {
            log::info!("Processing {} ({})", folder.key, folder.name());
            let listed = match folder.annotation_frames() {
                Ok(listed) => listed,
                Err(e) => {
                    log::warn!("Skipping folder {}: {}", folder.key, e);
                    summary.skipped_folders += 1;
                    continue;
                }
            };
            // Registers the folder even if none of its boxes survives.
            self.identities.offset(&folder.key)?;

            let mut frames = Vec::new();
            for frame in listed {
                summary.frames += 1;
                match self.plan_frame(folder, &frame, &mut summary) {
                    Some(crops) if !crops.jobs.is_empty() => frames.push(crops),
                    Some(_) => {}
                    None => summary.skipped_frames += 1,
                }
                if self.config.progress_every > 0 && summary.frames % self.config.progress_every == 0 {
                    log::info!("{} frames planned, {} crops so far", summary.frames, self.next_crop_index);
                }
            }

            let paths = match &pool {
                Some(pool) => pool.install(|| extractor.extract_all(&frames)),
                None => extractor.extract_all(&frames),
            };
            log::info!("{}: wrote {} crop(s)", folder.key, paths.len());
            written.extend(paths);
        }
        summary.crops = written.len();

        if let Some(path) = &self.config.identity.table_path {
            self.identities.save(path)?;
        }

        let partitioner = Partitioner::new(self.config.split.clone());
        let (plan, partition) = partitioner.run(output)?;
        summary.identities = plan.identities.len();
        summary.manifest = write_manifest(output, &written, &plan, &partitioner)?;
        summary.plan = plan;
        summary.partition = partition;

        log::info!(
            "ReID dataset: {} crops of {} identities from {} frames ({} skipped, {} of {} boxes rejected)",
            summary.crops,
            summary.identities,
            summary.frames,
            summary.skipped_frames,
            summary.rejected,
            summary.boxes
        );
        Ok(summary)
    }
}

/// Write the final location of every crop, relative to `output`, in creation
/// order. Crops the partitioner did not see are listed where they were written.
fn write_manifest(
    output: &Path,
    written: &[PathBuf],
    plan: &PartitionPlan,
    partitioner: &Partitioner,
) -> Result<PathBuf> {
    let mut destinations = HashMap::new();
    for assignment in &plan.identities {
        for (split, crop) in assignment.iter() {
            destinations.insert(crop, partitioner.split_dir(output, assignment.global_id, split));
        }
    }

    let mut text = String::new();
    for path in written {
        let name = file_name(path);
        let location = match destinations.get(name.as_str()) {
            Some(dir) => dir.join(&name),
            None => path.clone(),
        };
        let relative = location.strip_prefix(output).unwrap_or(location.as_path());
        text.push_str(&relative.to_string_lossy());
        text.push('\n');
    }

    let manifest = output.join(MANIFEST_NAME);
    fs::write(&manifest, text)?;
    Ok(manifest)
}
