//! Versioned manifests of index files.
//!
//! A snapshot lists the top-level files and directories that make up one
//! point-in-time version of the index. Once written, a snapshot file is
//! never modified; newer versions are published under a higher generation
//! and the old file is reclaimed by the purger when nobody reads it anymore.

use ahash::AHashSet;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{GlaiveError, Result};
use crate::index::file_names;
use crate::storage::{Folder, write_file_atomic};

/// Current snapshot file format.
pub const CURRENT_FORMAT: u32 = 2;

/// Current snapshot file subformat.
pub const CURRENT_SUBFORMAT: u32 = 1;

/// On-disk representation of a snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    format: u32,
    #[serde(default)]
    subformat: u32,
    entries: Vec<String>,
}

/// An ordered set of index file names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<String>,
    path: Option<String>,
}

impl Snapshot {
    /// Create an empty snapshot with no path.
    pub fn new() -> Self {
        Snapshot::default()
    }

    /// Add an entry. Adding an existing entry is a no-op.
    ///
    /// Returns whether the entry was new.
    pub fn add_entry(&mut self, entry: impl Into<String>) -> bool {
        let entry = entry.into();
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove an entry. Returns whether it was present.
    pub fn delete_entry(&mut self, entry: &str) -> bool {
        match self.entries.iter().position(|e| e == entry) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Entries in insertion order.
    pub fn list(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot contains an entry.
    pub fn contains(&self, entry: &str) -> bool {
        self.entries.iter().any(|e| e == entry)
    }

    /// File this snapshot was last read from or written to.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Set the file this snapshot is associated with.
    pub fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    /// Persist the snapshot.
    ///
    /// With `path == None` the next unused generation name is allocated. An
    /// existing file is never overwritten. The data is written under a
    /// temporary name and renamed into place, so readers never observe a
    /// partial file.
    pub fn write_file(&mut self, folder: &dyn Folder, path: Option<&str>) -> Result<()> {
        let path = match path {
            Some(path) => path.to_string(),
            None => {
                let next = file_names::latest_snapshot(folder)?
                    .map(|name| file_names::extract_gen(&name) + 1)
                    .unwrap_or(1);
                file_names::snapshot_name(next)
            }
        };

        if folder.exists(&path) {
            return Err(GlaiveError::already_exists(format!(
                "snapshot file '{path}'"
            )));
        }

        let data = SnapshotFile {
            format: CURRENT_FORMAT,
            subformat: CURRENT_SUBFORMAT,
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&data)?;
        write_file_atomic(folder, &path, &bytes)?;

        debug!("Wrote snapshot {path} with {} entries", self.entries.len());
        self.path = Some(path);
        Ok(())
    }

    /// Load a snapshot, replacing the in-memory contents.
    ///
    /// With `path == None` the latest snapshot in the folder is read; if the
    /// folder has none, the result is empty and has no path.
    pub fn read_file(&mut self, folder: &dyn Folder, path: Option<&str>) -> Result<()> {
        let path = match path {
            Some(path) => path.to_string(),
            None => match file_names::latest_snapshot(folder)? {
                Some(latest) => latest,
                None => {
                    self.entries.clear();
                    self.path = None;
                    return Ok(());
                }
            },
        };

        let bytes = folder.slurp_file(&path).map_err(|e| {
            if e.is_not_found() {
                GlaiveError::not_found(format!("snapshot file '{path}'"))
            } else {
                e
            }
        })?;
        let data: SnapshotFile = serde_json::from_slice(&bytes)
            .map_err(|e| GlaiveError::corrupt_snapshot(format!("{path}: {e}")))?;

        if data.format > CURRENT_FORMAT {
            return Err(GlaiveError::corrupt_snapshot(format!(
                "{path}: format {} is newer than supported format {CURRENT_FORMAT}",
                data.format
            )));
        }

        let mut seen = AHashSet::with_capacity(data.entries.len());
        if let Some(dup) = data.entries.iter().find(|e| !seen.insert(e.as_str())) {
            return Err(GlaiveError::corrupt_snapshot(format!(
                "{path}: duplicate entry '{dup}'"
            )));
        }

        self.entries = data.entries;
        self.path = Some(path);
        Ok(())
    }

    /// Convenience constructor around [`Snapshot::read_file`].
    pub fn open(folder: &dyn Folder, path: Option<&str>) -> Result<Self> {
        let mut snapshot = Snapshot::new();
        snapshot.read_file(folder, path)?;
        Ok(snapshot)
    }
}
