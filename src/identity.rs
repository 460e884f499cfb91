//! Cross-folder identity assignment.
//!
//! Raw labels are small integers reused by every source video, so a label
//! alone does not identify a subject. Each source folder is given a block of
//! `block_size` ids the first time it is seen, and
//! `global_id = offset(folder) + raw_label`. As long as raw labels stay below
//! `block_size` the mapping is injective.
//!
//! Offsets are handed out in the order folders are first resolved, so callers
//! visit folders in sorted order. Persisting the table with
//! [`IdentityResolver::save`] and reloading it with
//! [`IdentityResolver::load_or_new`] keeps the ids of known folders stable
//! across runs regardless of which folders are added later.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;
use crate::{Error, Result};

/// Persistent form of the folder → offset assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTable {
    pub block_size: u32,
    pub start_id: u32,
    pub next_offset: u32,
    pub offsets: BTreeMap<String, u32>,
}

/// Maps `(source_folder, raw_label)` pairs to global identity ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolver {
    table: IdentityTable,
}

impl IdentityResolver {
    /// Create an empty resolver.
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            table: IdentityTable {
                block_size: config.block_size,
                start_id: config.start_id,
                next_offset: config.start_id,
                offsets: BTreeMap::new(),
            },
        }
    }

    /// Load the table at `config.table_path` if it exists, otherwise start empty.
    pub fn load_or_new(config: &IdentityConfig) -> Result<Self> {
        let Some(path) = config.table_path.as_deref().filter(|p| p.exists()) else {
            return Ok(Self::new(config));
        };

        let text = fs::read_to_string(path)?;
        let table: IdentityTable = serde_json::from_str(&text)?;
        for (field, stored, configured) in [
            ("block_size", table.block_size, config.block_size),
            ("start_id", table.start_id, config.start_id),
        ] {
            if stored != configured {
                return Err(Error::InvalidConfig(format!(
                    "identity table '{}' uses {} {}, configuration has {}",
                    path.display(),
                    field,
                    stored,
                    configured
                )));
            }
        }
        log::info!(
            "Loaded identity table with {} folder(s) from {}",
            table.offsets.len(),
            path.display()
        );
        Ok(Self { table })
    }

    /// Write the table as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.table)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Offset of `folder`, assigning the next block if the folder is new.
    pub fn offset(&mut self, folder: &str) -> Result<u32> {
        if let Some(&offset) = self.table.offsets.get(folder) {
            return Ok(offset);
        }

        let offset = self.table.next_offset;
        self.table.next_offset = offset.checked_add(self.table.block_size).ok_or_else(|| {
            Error::IdentityOverflow(format!("no identity block left for folder '{}'", folder))
        })?;
        self.table.offsets.insert(folder.to_string(), offset);
        log::debug!("Folder '{}' gets identity offset {}", folder, offset);
        Ok(offset)
    }

    /// Global id of `raw_label` in `folder`.
    ///
    /// Fails with [`Error::IdentityOverflow`] when the label does not fit in
    /// the folder's block; the folder itself is still registered.
    pub fn resolve(&mut self, folder: &str, raw_label: u32) -> Result<u32> {
        let offset = self.offset(folder)?;
        if raw_label >= self.table.block_size {
            return Err(Error::IdentityOverflow(format!(
                "label {} in '{}' exceeds block size {}",
                raw_label, folder, self.table.block_size
            )));
        }
        Ok(offset + raw_label)
    }

    /// Global id of an already registered folder, without assigning.
    pub fn lookup(&self, folder: &str, raw_label: u32) -> Option<u32> {
        if raw_label >= self.table.block_size {
            return None;
        }
        self.table.offsets.get(folder).map(|offset| offset + raw_label)
    }

    /// 1-based position of the folder's block, used as a sequence number in
    /// crop file names.
    pub fn folder_ordinal(&self, folder: &str) -> Option<u32> {
        self.table
            .offsets
            .get(folder)
            .map(|offset| (offset - self.table.start_id) / self.table.block_size + 1)
    }

    /// Number of registered folders.
    pub fn num_folders(&self) -> usize {
        self.table.offsets.len()
    }

    pub fn table(&self) -> &IdentityTable {
        &self.table
    }
}
