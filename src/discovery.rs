//! Discovery of source folders and their frames.
//!
//! A source folder is a directory of annotation files whose path contains a
//! component named after a [`PathRule`]'s `annotation_dir`. Its frames live in
//! the directory obtained by replacing that component with the rule's
//! `image_dir`, under the same file stems:
//!
//! ```text
//! <root>/game_1/anno/000001.json    <->  <root>/game_1/frames/000001.jpg
//! <root>/third_task/clip/000001.json <-> <root>/playerTrackingFrames2/clip/000001.jpg
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::PathRule;
use crate::utils::{file_stem, has_extension, list_sorted_files};
use crate::{Error, Result};

/// One annotation file and/or its frame image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stem: String,
    pub annotation: Option<PathBuf>,
    pub image: Option<PathBuf>,
}

/// An annotated video: annotation directory, frame directory and the rule
/// linking them.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFolder {
    /// Relative path of the annotation directory, `/`-separated. Unique within
    /// one input root.
    pub key: String,
    pub annotation_dir: PathBuf,
    pub image_dir: PathBuf,
    pub rule: PathRule,
}

impl SourceFolder {
    /// Last component of the frame directory, used to prefix exported files.
    pub fn name(&self) -> String {
        self.image_dir
            .file_name()
            .or_else(|| self.annotation_dir.file_name())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.key.clone())
    }

    /// The key flattened into a single path component, used to prefix files
    /// exported from several folders into one directory.
    pub fn flat_name(&self) -> String {
        self.key.replace('/', "_")
    }

    /// The image for `stem`, trying each configured extension in order.
    pub fn image_for(&self, stem: &str) -> Option<PathBuf> {
        self.rule
            .image_exts
            .iter()
            .map(|ext| self.image_dir.join(format!("{}.{}", stem, ext)))
            .find(|p| p.is_file())
    }

    fn annotation_for(&self, stem: &str) -> Option<PathBuf> {
        let path = self
            .annotation_dir
            .join(format!("{}.{}", stem, self.rule.annotation_ext));
        path.is_file().then_some(path)
    }

    /// Frames driven by the annotation files, sorted by file name.
    ///
    /// `image` is `None` when no frame with a configured extension exists.
    pub fn annotation_frames(&self) -> Result<Vec<Frame>> {
        let files = list_sorted_files(&self.annotation_dir, &[&self.rule.annotation_ext])?;
        Ok(files
            .into_iter()
            .map(|annotation| {
                let stem = file_stem(&annotation);
                let image = self.image_for(&stem);
                Frame {
                    stem,
                    annotation: Some(annotation),
                    image,
                }
            })
            .collect())
    }

    /// Frames driven by the image files, sorted by file name.
    ///
    /// Images without an annotation are still frames (`annotation` is `None`).
    /// Returns an empty list when the image directory does not exist.
    pub fn image_frames(&self) -> Result<Vec<Frame>> {
        if !self.image_dir.is_dir() {
            return Ok(Vec::new());
        }
        let files = list_sorted_files(&self.image_dir, &self.rule.image_exts)?;
        let mut seen = HashSet::new();
        let mut frames = Vec::with_capacity(files.len());
        for image in files {
            let stem = file_stem(&image);
            if !seen.insert(stem.clone()) {
                log::warn!(
                    "{}: several images share the stem '{}', keeping the first",
                    self.image_dir.display(),
                    stem
                );
                continue;
            }
            let annotation = self.annotation_for(&stem);
            frames.push(Frame {
                stem,
                annotation,
                image: Some(image),
            });
        }
        Ok(frames)
    }
}

/// Fail unless `root` is an existing, readable directory.
pub fn ensure_input_root(root: &Path) -> Result<()> {
    match fs::read_dir(root) {
        Ok(_) if root.is_dir() => Ok(()),
        Ok(_) => Err(Error::MissingInput(format!("'{}' is not a directory", root.display()))),
        Err(e) => Err(Error::MissingInput(format!("'{}': {}", root.display(), e))),
    }
}

/// Find all source folders below `root`, sorted by key.
pub fn discover(root: &Path, rules: &[PathRule]) -> Result<Vec<SourceFolder>> {
    ensure_input_root(root)?;

    let mut folders = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            }
        }

        if let Some(folder) = match_folder(root, &dir, &files, rules) {
            folders.push(folder);
        }
    }

    folders.sort_by(|a, b| a.key.cmp(&b.key));
    log::info!("Discovered {} source folder(s) in {}", folders.len(), root.display());
    Ok(folders)
}

fn match_folder(root: &Path, dir: &Path, files: &[PathBuf], rules: &[PathRule]) -> Option<SourceFolder> {
    let relative = dir.strip_prefix(root).ok()?;
    let components: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let mut candidates = Vec::new();
    for rule in rules {
        let Some(position) = components.iter().position(|c| *c == rule.annotation_dir) else {
            continue;
        };
        if !files.iter().any(|f| has_extension(f, &[&rule.annotation_ext])) {
            continue;
        }

        let mut image_dir = root.to_path_buf();
        for (i, component) in components.iter().enumerate() {
            image_dir.push(if i == position { &rule.image_dir } else { component });
        }
        candidates.push(SourceFolder {
            key: components.join("/"),
            annotation_dir: dir.to_path_buf(),
            image_dir,
            rule: rule.clone(),
        });
    }

    // Several rules may share an annotation folder name; prefer the first one
    // whose frame directory exists.
    let index = candidates
        .iter()
        .position(|c| c.image_dir.is_dir())
        .unwrap_or(0);
    if index < candidates.len() {
        Some(candidates.swap_remove(index))
    } else {
        None
    }
}
