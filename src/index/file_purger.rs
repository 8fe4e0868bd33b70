//! Reclamation of files no reader can reach anymore.

use ahash::AHashSet;
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::index::file_names::{self, MERGE_DATA_FILE, TEMP_SUFFIX};
use crate::index::manager::IndexManager;
use crate::index::snapshot::Snapshot;
use crate::storage::lock::Lock;

/// What a purge did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Set when the deletion lock could not be obtained and nothing was done.
    pub skipped: bool,
    /// Snapshot files removed.
    pub snapshots: Vec<String>,
    /// Segment directories and other files removed.
    pub entries: Vec<String>,
    /// Paths whose removal failed; a later purge retries them.
    pub failed: Vec<String>,
}

impl PurgeReport {
    fn skipped() -> Self {
        PurgeReport {
            skipped: true,
            ..Default::default()
        }
    }

    /// Number of paths removed.
    pub fn removed(&self) -> usize {
        self.snapshots.len() + self.entries.len()
    }
}

/// Deletes obsolete snapshots, segments and debris.
///
/// Files referenced by the current snapshot, or by any older snapshot a
/// reader holds a read lock on, survive. Everything else at the top level
/// of the index that the index produced is fair game: superseded snapshots
/// and their segments, segments no snapshot mentions, `*.temp` leftovers and
/// the output of a merge that died. The caller must hold the write lock.
#[derive(Debug)]
pub struct FilePurger<'a> {
    manager: &'a IndexManager,
}

impl<'a> FilePurger<'a> {
    pub fn new(manager: &'a IndexManager) -> Self {
        FilePurger { manager }
    }

    /// Run one purge pass.
    pub fn purge(&self) -> Result<PurgeReport> {
        let mut deletion_lock = self.manager.make_deletion_lock();
        match deletion_lock.obtain() {
            Ok(()) => {}
            Err(e) if e.is_lock_contention() => {
                warn!("Skipping purge: {e}");
                return Ok(PurgeReport::skipped());
            }
            Err(e) => return Err(e),
        }

        let result = self.purge_locked();
        deletion_lock.release()?;
        result
    }

    fn purge_locked(&self) -> Result<PurgeReport> {
        let folder = self.manager.folder().as_ref();
        let mut spared: AHashSet<String> = AHashSet::new();
        let mut candidates: AHashSet<String> = AHashSet::new();
        let mut doomed_snapshots = Vec::new();

        let mut snapshot_files = file_names::snapshot_files(folder)?;
        if let Some(current) = snapshot_files.pop() {
            let snapshot = Snapshot::open(folder, Some(current.as_str()))?;
            spared.extend(snapshot.list().iter().cloned());
            spared.insert(current);
        }

        for file in snapshot_files {
            // A snapshot that can't be read might reference anything.
            let snapshot = Snapshot::open(folder, Some(file.as_str()))?;
            let mut read_lock = self.manager.make_snapshot_read_lock(&file)?;
            if read_lock.clear_stale()? {
                debug!("Cleared stale read lock on {file}");
            }
            if read_lock.is_locked()? {
                debug!("{file} is in use, sparing its files");
                spared.extend(snapshot.list().iter().cloned());
                spared.insert(file);
            } else {
                candidates.extend(snapshot.list().iter().cloned());
                doomed_snapshots.push(file);
            }
        }

        for name in folder.list("")? {
            if file_names::segment_number(&name).is_some() || name.ends_with(TEMP_SUFFIX) {
                candidates.insert(name);
            }
        }

        if let Some(merge_data) = self.manager.read_merge_data()? {
            let mut merge_lock = self.manager.make_merge_lock();
            merge_lock.clear_stale()?;
            let cutoff_seg = file_names::segment_name(merge_data.cutoff);
            if merge_lock.is_locked()? {
                spared.insert(cutoff_seg);
            } else {
                info!("Cleaning up after dead merge into {cutoff_seg}");
                candidates.insert(cutoff_seg);
                candidates.insert(MERGE_DATA_FILE.to_string());
            }
        }

        let mut report = PurgeReport::default();
        for file in doomed_snapshots {
            match folder.delete(&file) {
                Ok(_) => report.snapshots.push(file),
                Err(e) => {
                    warn!("Failed to delete {file}: {e}");
                    report.failed.push(file);
                }
            }
        }

        let mut entries: Vec<String> = candidates
            .into_iter()
            .filter(|name| !spared.contains(name) && folder.exists(name))
            .collect();
        entries.sort();
        for entry in entries {
            let outcome = if folder.is_directory(&entry) {
                folder.delete_tree(&entry)
            } else {
                folder.delete(&entry)
            };
            match outcome {
                Ok(_) => report.entries.push(entry),
                Err(e) => {
                    warn!("Failed to delete {entry}: {e}");
                    report.failed.push(entry);
                }
            }
        }

        if report.removed() > 0 {
            info!(
                "Purged {} snapshots and {} entries",
                report.snapshots.len(),
                report.entries.len()
            );
        }
        Ok(report)
    }
}
