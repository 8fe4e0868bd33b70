//! Merging segments without holding up indexers.

use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info, warn};

use crate::error::{GlaiveError, Result};
use crate::index::data::{DataReader, DocMap};
use crate::index::file_names::{self, TEMP_SUFFIX};
use crate::index::file_purger::FilePurger;
use crate::index::indexer::{CommitState, publish_snapshot};
use crate::index::manager::{IndexManager, IndexManagerConfig};
use crate::index::poly_reader::PolyReader;
use crate::index::seg_writer::SegWriter;
use crate::index::segment::Segment;
use crate::index::snapshot::Snapshot;
use crate::storage::Folder;
use crate::storage::lock::{ExclusiveLock, Lock};

/// Consolidates segments while indexers keep committing.
///
/// The write lock is only held while opening and while publishing. For the
/// rest of the merge the merge lock and the merge data keep indexers from
/// touching the segments being merged: they allocate segment numbers above
/// the recorded cutoff and never recycle segments at or below it. Deletions
/// that indexers apply to merged segments in the meantime are carried over
/// into a small deletions-only segment before publishing.
#[derive(Debug)]
pub struct BackgroundMerger {
    manager: IndexManager,
    state: CommitState,
    write_lock: ExclusiveLock,
    merge_lock: ExclusiveLock,
    snapshot: Snapshot,
    start_path: Option<String>,
    polyreader: PolyReader,
    seg_writer: Option<SegWriter>,
    cutoff: u64,
    optimize: bool,
    needs_commit: bool,
    snapfile: Option<String>,
    doc_maps: AHashMap<String, DocMap>,
}

impl BackgroundMerger {
    /// Claim the index for a background merge.
    ///
    /// Fails with a lock error if another merge is running. On an empty index
    /// the merger does nothing and releases its locks right away.
    pub fn open(folder: Arc<dyn Folder>, config: IndexManagerConfig) -> Result<Self> {
        Self::with_manager(IndexManager::with_config(folder, config))
    }

    pub fn with_manager(manager: IndexManager) -> Result<Self> {
        let mut write_lock = manager.make_write_lock();
        write_lock.clear_stale()?;
        write_lock.obtain()?;
        let mut merge_lock = manager.make_merge_lock();
        merge_lock.clear_stale()?;
        merge_lock.obtain()?;

        let folder = Arc::clone(manager.folder());
        let snapshot = Snapshot::open(folder.as_ref(), None)?;
        let start_path = snapshot.path().map(str::to_string);

        let mut merger = BackgroundMerger {
            manager,
            state: CommitState::Locked,
            write_lock,
            merge_lock,
            snapshot,
            start_path,
            polyreader: PolyReader::empty(),
            seg_writer: None,
            cutoff: 0,
            optimize: false,
            needs_commit: false,
            snapfile: None,
            doc_maps: AHashMap::new(),
        };

        if merger.start_path.is_none() {
            debug!("Nothing to merge in an empty index");
            merger.release_locks()?;
            merger.state = CommitState::Writing;
            return Ok(merger);
        }

        match merger.claim() {
            Ok(()) => {
                merger.state = CommitState::Writing;
                Ok(merger)
            }
            Err(e) => {
                merger.fail();
                Err(e)
            }
        }
    }

    fn claim(&mut self) -> Result<()> {
        match FilePurger::new(&self.manager).purge() {
            Ok(report) => debug!("Purge removed {} files", report.removed()),
            Err(e) => warn!("Purge before merge failed: {e}"),
        }

        self.polyreader = PolyReader::open_snapshot(&self.manager, self.snapshot.clone())?;

        let seg_num = self.manager.next_seg_num(&self.snapshot)?;
        self.cutoff = seg_num;
        self.manager.write_merge_data(seg_num)?;

        let folder = Arc::clone(self.manager.folder());
        self.seg_writer = Some(SegWriter::new(
            folder,
            Segment::new(seg_num),
            &self.polyreader,
        ));
        info!("Background merge claimed cutoff {seg_num}");

        self.write_lock.release()
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    /// Number of the segment this merge writes; 0 for an empty index.
    pub fn cutoff(&self) -> u64 {
        self.cutoff
    }

    /// The snapshot being built.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Names of the segments merged away.
    pub fn merged_segments(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.doc_maps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Merge every segment instead of only the sparse ones.
    pub fn optimize(&mut self) {
        self.optimize = true;
    }

    /// Merge, then write the new snapshot under a temporary name while
    /// holding the write lock again.
    pub fn prepare_commit(&mut self) -> Result<()> {
        match self.state {
            CommitState::Writing => {}
            CommitState::Prepared => {
                return Err(GlaiveError::invalid_operation(
                    "prepare_commit called twice",
                ));
            }
            state => {
                return Err(GlaiveError::invalid_operation(format!(
                    "can't prepare a merge while {state}"
                )));
            }
        }

        match self.try_prepare() {
            Ok(()) => {
                self.state = CommitState::Prepared;
                Ok(())
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn try_prepare(&mut self) -> Result<()> {
        let Some(seg_writer) = self.seg_writer.as_mut() else {
            return Ok(());
        };

        let to_merge =
            self.manager
                .recycle(&self.polyreader, seg_writer.del_writer(), 0, self.optimize);
        if to_merge.is_empty() || (to_merge.len() == 1 && to_merge[0].del_count() == 0) {
            debug!("No segments need merging");
            return Ok(());
        }

        seg_writer.prep_seg_dir()?;
        for reader in &to_merge {
            let del_writer = seg_writer.del_writer();
            let live = reader
                .doc_max()
                .saturating_sub(del_writer.seg_del_count(reader.seg_name()));
            let doc_map = del_writer.doc_map(reader, seg_writer.segment().count());
            if live == 0 {
                seg_writer.delete_segment(reader, &mut self.snapshot)?;
            } else {
                seg_writer.merge_segment(reader, &doc_map, &mut self.snapshot)?;
            }
            self.doc_maps.insert(reader.seg_name().to_string(), doc_map);
        }
        seg_writer.finish(&mut self.snapshot)?;

        self.write_lock.obtain()?;

        let folder = Arc::clone(self.manager.folder());
        let latest = Snapshot::open(folder.as_ref(), None)?;
        if latest.path() != self.start_path.as_deref() {
            self.carry_forward(&latest)?;
        }

        let snapfile = self.manager.make_snapshot_filename()?;
        let temp = format!("{snapfile}{TEMP_SUFFIX}");
        folder.delete(&temp)?;
        self.snapshot.write_file(folder.as_ref(), Some(&temp))?;
        self.snapfile = Some(snapfile);
        self.needs_commit = true;
        Ok(())
    }

    /// Bring in what indexers committed while the merge ran: deletions
    /// against merged segments and every segment above the cutoff.
    fn carry_forward(&mut self, latest: &Snapshot) -> Result<()> {
        let folder = Arc::clone(self.manager.folder());
        let latest_reader = PolyReader::from_snapshot(folder.as_ref(), latest.clone())?;

        let mut changed = Vec::new();
        for seg_reader in latest_reader.seg_readers() {
            let Some(before) = self
                .polyreader
                .seg_readers()
                .iter()
                .find(|r| r.seg_name() == seg_reader.seg_name())
            else {
                continue;
            };
            if self.doc_maps.contains_key(seg_reader.seg_name())
                && seg_reader.del_count() != before.del_count()
            {
                changed.push(Arc::clone(seg_reader));
            }
        }

        if !changed.is_empty() {
            let merged_name = self
                .seg_writer
                .as_ref()
                .map(|w| w.segment().name().to_string())
                .ok_or_else(|| GlaiveError::index("merge has no segment"))?;
            let merged_reader = PolyReader::from_snapshot(folder.as_ref(), self.snapshot.clone())?;
            let tick = merged_reader
                .seg_readers()
                .iter()
                .position(|r| r.seg_name() == merged_name)
                .ok_or_else(|| GlaiveError::index(format!("{merged_name} missing after merge")))?;
            let merged_offset = merged_reader.offsets()[tick];

            let seg_num = self.manager.next_seg_num(latest)?.max(self.cutoff + 1);
            let mut del_seg_writer =
                SegWriter::new(Arc::clone(&folder), Segment::new(seg_num), &merged_reader);
            del_seg_writer.prep_seg_dir()?;

            let mut carried = 0;
            for seg_reader in &changed {
                let doc_map = &self.doc_maps[seg_reader.seg_name()];
                for doc_id in seg_reader.deletions().iter() {
                    if let Some(mapped) = doc_map.get(doc_id)
                        && del_seg_writer
                            .del_writer_mut()
                            .delete_by_doc_id(merged_offset + mapped)?
                    {
                        carried += 1;
                    }
                }
            }
            del_seg_writer.finish(&mut self.snapshot)?;
            info!(
                "Carried {carried} concurrent deletions into {}",
                del_seg_writer.segment().name()
            );
        }

        for entry in latest.list() {
            if let Some(number) = file_names::segment_number(entry)
                && number > self.cutoff
            {
                self.snapshot.add_entry(entry.as_str());
            }
        }
        Ok(())
    }

    /// Publish the merged snapshot, retire the merge data and purge.
    pub fn commit(&mut self) -> Result<()> {
        if self.state == CommitState::Writing {
            self.prepare_commit()?;
        }
        if self.state != CommitState::Prepared {
            return Err(GlaiveError::invalid_operation(format!(
                "can't commit a merge while {}",
                self.state
            )));
        }

        match self.try_commit() {
            Ok(()) => {
                self.state = CommitState::Idle;
                Ok(())
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn try_commit(&mut self) -> Result<()> {
        if self.needs_commit {
            let snapfile = self
                .snapfile
                .clone()
                .ok_or_else(|| GlaiveError::index("prepared merge lost its snapshot name"))?;
            publish_snapshot(self.manager.folder().as_ref(), &mut self.snapshot, &snapfile)?;
            info!(
                "Committed merge {snapfile}: {} segments into {}",
                self.doc_maps.len(),
                file_names::segment_name(self.cutoff)
            );
            self.state = CommitState::Published;
        }

        self.polyreader.close()?;
        if self.merge_lock.is_held() {
            self.manager.remove_merge_data()?;
            self.merge_lock.release()?;
        }

        if self.needs_commit {
            match FilePurger::new(&self.manager).purge() {
                Ok(report) => debug!("Purge removed {} files", report.removed()),
                Err(e) => warn!("Purge after merge failed: {e}"),
            }
        }

        if self.write_lock.is_held() {
            self.write_lock.release()?;
        }
        Ok(())
    }

    /// Abandon the merge. Nothing is published and the merge data is removed.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            CommitState::Idle | CommitState::Aborted => Ok(()),
            CommitState::Published => Err(GlaiveError::invalid_operation(
                "merge already published",
            )),
            _ => {
                info!("Aborting background merge at cutoff {}", self.cutoff);
                self.fail();
                Ok(())
            }
        }
    }

    fn release_locks(&mut self) -> Result<()> {
        if self.merge_lock.is_held() {
            self.merge_lock.release()?;
        }
        if self.write_lock.is_held() {
            self.write_lock.release()?;
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.state = CommitState::Aborted;
        if let Err(e) = self.polyreader.close() {
            warn!("Failed to close reader: {e}");
        }
        if self.merge_lock.is_held()
            && let Err(e) = self.manager.remove_merge_data()
        {
            warn!("Failed to remove merge data: {e}");
        }
        if let Err(e) = self.release_locks() {
            warn!("Failed to release locks: {e}");
        }
    }
}
