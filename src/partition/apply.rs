//! Realizing a partition plan on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{PartitionPlan, Split};
use crate::config::{SplitConfig, SplitLayout};
use crate::utils::{ensure_dir, file_name, list_sorted_dirs};
use crate::Result;

/// Directory names that are never treated as identities.
pub const RESERVED_DIRS: &[&str] = &["train", "test", "valid", "config"];

/// File counts of one [`Partitioner::apply`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub moved: usize,
    /// Already at the destination from an earlier run.
    pub in_place: usize,
    /// Neither at the source nor at the destination.
    pub missing: usize,
    pub removed_dirs: usize,
}

/// Scans identity directories, plans their split and moves the crops.
#[derive(Debug, Clone)]
pub struct Partitioner {
    config: SplitConfig,
}

impl Partitioner {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    fn is_structural(&self, name: &str) -> bool {
        RESERVED_DIRS.contains(&name)
            || name == self.config.dataset_name
            || Split::ALL.iter().any(|s| s.dir_name() == name)
    }

    /// Crop file names per identity directory directly below `root`.
    ///
    /// Reserved names, the dataset directory and directories whose name is not
    /// a numeric id are left out.
    pub fn scan(&self, root: &Path) -> Result<BTreeMap<u32, Vec<String>>> {
        let mut identities = BTreeMap::new();
        for dir in list_sorted_dirs(root)? {
            let name = file_name(&dir);
            if self.is_structural(&name) {
                log::debug!("Skipping reserved directory {}", dir.display());
                continue;
            }
            let Ok(global_id) = name.parse::<u32>() else {
                log::warn!("Skipping non-identity directory {}", dir.display());
                continue;
            };

            let mut crops = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let crop = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_file() && !crop.starts_with('.') {
                    crops.push(crop);
                }
            }
            crops.sort();
            identities.insert(global_id, crops);
        }
        Ok(identities)
    }

    pub fn plan(&self, identities: &BTreeMap<u32, Vec<String>>) -> PartitionPlan {
        PartitionPlan::build(identities, &self.config)
    }

    /// Destination directory of one identity's split.
    pub fn split_dir(&self, root: &Path, global_id: u32, split: Split) -> PathBuf {
        let dataset = root.join(&self.config.dataset_name);
        match self.config.layout {
            SplitLayout::Flat => dataset.join(split.dir_name()),
            SplitLayout::PerIdentity => dataset.join(global_id.to_string()).join(split.dir_name()),
        }
    }

    /// Move every planned crop from `<root>/<global_id>/` to its split
    /// directory and remove identity directories left empty.
    ///
    /// Safe to repeat: crops already at their destination are counted as
    /// in place.
    pub fn apply(&self, root: &Path, plan: &PartitionPlan) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();

        for assignment in &plan.identities {
            let source_dir = root.join(assignment.global_id.to_string());
            for (split, crop) in assignment.iter() {
                let source = source_dir.join(crop);
                let target_dir = self.split_dir(root, assignment.global_id, split);
                let target = target_dir.join(crop);

                if !source.exists() {
                    if target.exists() {
                        summary.in_place += 1;
                    } else {
                        log::warn!("Crop {} vanished before partitioning", source.display());
                        summary.missing += 1;
                    }
                    continue;
                }

                ensure_dir(&target_dir)?;
                move_file(&source, &target)?;
                summary.moved += 1;
            }

            if source_dir.is_dir() {
                match fs::remove_dir(&source_dir) {
                    Ok(()) => summary.removed_dirs += 1,
                    Err(e) => log::warn!(
                        "Leaving identity directory {}: {}",
                        source_dir.display(),
                        e
                    ),
                }
            }
        }

        Ok(summary)
    }

    /// Scan, plan and apply in one go.
    pub fn run(&self, root: &Path) -> Result<(PartitionPlan, ApplySummary)> {
        let identities = self.scan(root)?;
        let plan = self.plan(&identities);
        log::info!(
            "Partitioning {} crops of {} identities: {} train, {} query, {} gallery",
            plan.num_crops(),
            plan.identities.len(),
            plan.split_len(Split::Train),
            plan.split_len(Split::Query),
            plan.split_len(Split::Gallery)
        );
        let summary = self.apply(root, &plan)?;
        Ok((plan, summary))
    }
}

fn move_file(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    // Different filesystem: fall back to copy and delete.
    fs::copy(source, target)?;
    fs::remove_file(source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn make_identity(root: &Path, global_id: u32, n: usize) -> Vec<String> {
        let dir = root.join(global_id.to_string());
        fs::create_dir_all(&dir).unwrap();
        (0..n)
            .map(|i| {
                let name = format!("{:04}_c1s1_{:06}_00.jpg", global_id, i);
                fs::write(dir.join(&name), b"crop").unwrap();
                name
            })
            .collect()
    }

    fn files_in(dir: &Path) -> HashSet<String> {
        if !dir.is_dir() {
            return HashSet::new();
        }
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_scan_skips_reserved_and_non_numeric() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_identity(root, 3, 2);
        for name in ["train", "test", "valid", "config", "market1501", "query", "logs"] {
            fs::create_dir_all(root.join(name)).unwrap();
            fs::write(root.join(name).join("x.jpg"), b"").unwrap();
        }
        fs::create_dir_all(root.join("7")).unwrap();

        let partitioner = Partitioner::new(SplitConfig::default());
        let identities = partitioner.scan(root).unwrap();
        assert_eq!(identities.keys().copied().collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(identities[&3].len(), 2);
        assert!(identities[&7].is_empty());
    }

    #[test]
    fn test_apply_flat_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut original = HashSet::new();
        original.extend(make_identity(root, 17, 25));
        original.extend(make_identity(root, 30, 4));

        let partitioner = Partitioner::new(SplitConfig::default());
        let (plan, summary) = partitioner.run(root).unwrap();
        assert_eq!(summary.moved, 29);
        assert_eq!(summary.removed_dirs, 2);
        assert!(!root.join("17").exists());
        assert!(!root.join("30").exists());

        let dataset = root.join("market1501");
        let mut union = HashSet::new();
        let mut total = 0;
        for split in Split::ALL {
            let files = files_in(&dataset.join(split.dir_name()));
            total += files.len();
            assert_eq!(files.len(), plan.split_len(split));
            union.extend(files);
        }
        assert_eq!(total, 29);
        assert_eq!(union, original);
    }

    #[test]
    fn test_apply_per_identity_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_identity(root, 17, 12);

        let partitioner = Partitioner::new(SplitConfig {
            layout: SplitLayout::PerIdentity,
            ..Default::default()
        });
        let (plan, _) = partitioner.run(root).unwrap();

        let identity_root = root.join("market1501").join("17");
        for split in Split::ALL {
            assert_eq!(
                files_in(&identity_root.join(split.dir_name())).len(),
                plan.split_len(split)
            );
        }
    }

    #[test]
    fn test_apply_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_identity(root, 17, 20);

        let partitioner = Partitioner::new(SplitConfig::default());
        let identities = partitioner.scan(root).unwrap();
        let plan = partitioner.plan(&identities);

        let first = partitioner.apply(root, &plan).unwrap();
        assert_eq!(first.moved, 20);

        let second = partitioner.apply(root, &plan).unwrap();
        assert_eq!(second.moved, 0);
        assert_eq!(second.in_place, 20);
        assert_eq!(second.missing, 0);

        // A rescan after partitioning finds nothing left to split.
        assert!(partitioner.scan(root).unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_files_keep_identity_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let names = make_identity(root, 5, 3);

        let partitioner = Partitioner::new(SplitConfig::default());
        let mut identities = BTreeMap::new();
        identities.insert(5, names[..2].to_vec());
        let plan = partitioner.plan(&identities);
        let summary = partitioner.apply(root, &plan).unwrap();

        assert_eq!(summary.moved, 2);
        assert_eq!(summary.removed_dirs, 0);
        assert!(root.join("5").join(&names[2]).is_file());
    }
}
