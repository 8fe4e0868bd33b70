//! The foreground writer: adds and deletes documents, then commits a new
//! snapshot.

use std::fmt;
use std::sync::Arc;

use ahash::AHashSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{GlaiveError, Result};
use crate::index::data::DataReader;
use crate::index::deletions::generate_doc_map;
use crate::index::file_names::TEMP_SUFFIX;
use crate::index::file_purger::FilePurger;
use crate::index::manager::{IndexManager, IndexManagerConfig};
use crate::index::poly_reader::PolyReader;
use crate::index::seg_writer::SegWriter;
use crate::index::segment::Segment;
use crate::index::snapshot::Snapshot;
use crate::storage::Folder;
use crate::storage::lock::{ExclusiveLock, Lock};

/// Where a writer is in the commit protocol.
///
/// `Idle → Locked → Writing → Prepared → Published → Idle`; any failure
/// lands in `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Idle,
    Locked,
    Writing,
    Prepared,
    Published,
    Aborted,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitState::Idle => "idle",
            CommitState::Locked => "locked",
            CommitState::Writing => "writing",
            CommitState::Prepared => "prepared",
            CommitState::Published => "published",
            CommitState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Options for [`Indexer::open`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerOptions {
    /// Start a new index if the folder holds none.
    pub create: bool,
    /// Discard every existing document on commit.
    pub truncate: bool,
    /// Lock policy and host identity.
    pub manager: IndexManagerConfig,
}

/// Adds and deletes documents, publishing the result as one new snapshot.
///
/// An `Indexer` holds the write lock from [`Indexer::open`] until
/// [`Indexer::commit`] or [`Indexer::abort`], so at most one exists per index
/// at a time. Deletions apply to documents committed before the indexer was
/// opened; documents added through it become visible once committed.
#[derive(Debug)]
pub struct Indexer {
    manager: IndexManager,
    state: CommitState,
    write_lock: ExclusiveLock,
    merge_lock: Option<ExclusiveLock>,
    snapshot: Snapshot,
    polyreader: PolyReader,
    seg_writer: SegWriter,
    optimize: bool,
    needs_commit: bool,
    snapfile: Option<String>,
}

impl Indexer {
    /// Open an index for writing.
    pub fn open(folder: Arc<dyn Folder>, options: IndexerOptions) -> Result<Self> {
        let manager = IndexManager::with_config(folder, options.manager);
        Self::with_manager(manager, options.create, options.truncate)
    }

    /// Open an index for writing with an existing manager.
    pub fn with_manager(manager: IndexManager, create: bool, truncate: bool) -> Result<Self> {
        let mut write_lock = manager.make_write_lock();
        write_lock.clear_stale()?;
        write_lock.obtain()?;

        let folder = Arc::clone(manager.folder());
        let latest = Snapshot::open(folder.as_ref(), None)?;
        if latest.path().is_none() && !create {
            return Err(GlaiveError::not_found(
                "no index in folder; open with create to start one",
            ));
        }

        let (snapshot, polyreader) = if truncate || latest.path().is_none() {
            (Snapshot::new(), PolyReader::empty())
        } else {
            let reader = PolyReader::open_snapshot(&manager, latest.clone())?;
            (latest.clone(), reader)
        };

        let mut merge_lock = manager.make_merge_lock();
        merge_lock.clear_stale()?;
        if merge_lock.is_locked()? && manager.read_merge_data()?.is_none() {
            return Err(GlaiveError::index(
                "background merge detected, but merge data is missing",
            ));
        }
        let new_seg_num = manager.next_seg_num(&latest)?;

        let seg_writer = SegWriter::new(folder, Segment::new(new_seg_num), &polyreader);
        seg_writer.prep_seg_dir()?;
        debug!(
            "Indexer writing {} on top of {}",
            seg_writer.segment().name(),
            latest.path().unwrap_or("an empty index")
        );

        Ok(Indexer {
            manager,
            state: CommitState::Writing,
            write_lock,
            merge_lock: None,
            snapshot,
            polyreader,
            seg_writer,
            optimize: false,
            needs_commit: false,
            snapfile: None,
        })
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    pub fn manager(&self) -> &IndexManager {
        &self.manager
    }

    /// The snapshot being built.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The segment this indexer writes.
    pub fn segment(&self) -> &Segment {
        self.seg_writer.segment()
    }

    fn ensure_writing(&self) -> Result<()> {
        if self.state == CommitState::Writing {
            Ok(())
        } else {
            Err(GlaiveError::invalid_operation(format!(
                "indexer is {}, not writing",
                self.state
            )))
        }
    }

    /// Add a document.
    pub fn add_doc(&mut self, doc: &Document) -> Result<()> {
        self.ensure_writing()?;
        self.seg_writer.add_doc(doc)?;
        Ok(())
    }

    /// Copy every live document of the index in `other`.
    pub fn add_index(&mut self, other: Arc<dyn Folder>) -> Result<()> {
        self.ensure_writing()?;
        let other_manager = IndexManager::with_config(other, self.manager.config().clone());
        let mut reader = PolyReader::open(&other_manager)?;
        for seg_reader in reader.seg_readers() {
            let doc_map = generate_doc_map(
                seg_reader.deletions().bits(),
                seg_reader.doc_max(),
                self.seg_writer.segment().count(),
            );
            self.seg_writer.add_segment(seg_reader, &doc_map)?;
        }
        info!(
            "Added {} docs from another index",
            reader.doc_count()
        );
        reader.close()
    }

    /// Delete every document whose `field` contains `term`. Returns the
    /// number of newly deleted documents.
    pub fn delete_by_term(&mut self, field: &str, term: &str) -> Result<u32> {
        self.ensure_writing()?;
        Ok(self.seg_writer.del_writer_mut().delete_by_term(field, term))
    }

    /// Delete a document by its id in the snapshot the indexer opened.
    /// Returns whether it was live.
    pub fn delete_by_doc_id(&mut self, doc_id: u32) -> Result<bool> {
        self.ensure_writing()?;
        self.seg_writer.del_writer_mut().delete_by_doc_id(doc_id)
    }

    /// Merge every eligible segment into the new one on commit.
    pub fn optimize(&mut self) {
        self.optimize = true;
    }

    /// Write everything needed for the commit under a temporary snapshot
    /// name. Nothing becomes visible until [`Indexer::commit`].
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
                    "can't prepare a commit while {state}"
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
        let merged = self.maybe_merge()?;
        let folder = Arc::clone(self.manager.folder());
        let seg_name = self.seg_writer.segment().name().to_string();

        let has_segment =
            self.seg_writer.segment().count() > 0 || self.seg_writer.del_writer().updated();
        if has_segment {
            self.seg_writer.finish(&mut self.snapshot)?;
        } else {
            folder.delete_tree(&seg_name)?;
        }

        if has_segment || merged || self.snapshot.path().is_none() {
            let snapfile = self.manager.make_snapshot_filename()?;
            let temp = format!("{snapfile}{TEMP_SUFFIX}");
            folder.delete(&temp)?;
            self.snapshot.write_file(folder.as_ref(), Some(&temp))?;
            self.snapfile = Some(snapfile);
            self.needs_commit = true;
        }

        self.polyreader.close()
    }

    /// Fold recycled segments into the new one. Returns whether anything
    /// was merged or dropped.
    fn maybe_merge(&mut self) -> Result<bool> {
        let mut merge_lock = self.manager.make_merge_lock();
        let cutoff = match merge_lock.obtain() {
            Ok(()) => {
                self.merge_lock = Some(merge_lock);
                // Nobody is merging, so any merge data belongs to a dead merge.
                if self.manager.remove_merge_data()? {
                    info!("Removed merge data left behind by a dead merge");
                }
                0
            }
            Err(e) if e.is_lock_contention() => self
                .manager
                .read_merge_data()?
                .map_or(u64::MAX, |data| data.cutoff),
            Err(e) => return Err(e),
        };

        let to_merge = self.manager.recycle(
            &self.polyreader,
            self.seg_writer.del_writer(),
            cutoff,
            self.optimize,
        );

        let mut seen = AHashSet::with_capacity(to_merge.len());
        for reader in &to_merge {
            if !seen.insert(reader.seg_num()) {
                return Err(GlaiveError::index(format!(
                    "{} recycled twice",
                    reader.seg_name()
                )));
            }
            if reader.seg_num() <= cutoff {
                return Err(GlaiveError::index(format!(
                    "{} is at or below merge cutoff {cutoff}",
                    reader.seg_name()
                )));
            }
        }

        for reader in &to_merge {
            let del_writer = self.seg_writer.del_writer();
            let live = reader
                .doc_max()
                .saturating_sub(del_writer.seg_del_count(reader.seg_name()));
            if live == 0 {
                self.seg_writer.delete_segment(reader, &mut self.snapshot)?;
            } else {
                let doc_map = del_writer.doc_map(reader, self.seg_writer.segment().count());
                self.seg_writer
                    .merge_segment(reader, &doc_map, &mut self.snapshot)?;
            }
        }

        Ok(!to_merge.is_empty())
    }

    /// Publish the new snapshot, purge obsolete files and release the locks.
    ///
    /// Prepares the commit first if [`Indexer::prepare_commit`] wasn't called.
    pub fn commit(&mut self) -> Result<()> {
        if self.state == CommitState::Writing {
            self.prepare_commit()?;
        }
        if self.state != CommitState::Prepared {
            return Err(GlaiveError::invalid_operation(format!(
                "can't commit while {}",
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
                .ok_or_else(|| GlaiveError::index("prepared commit lost its snapshot name"))?;
            publish_snapshot(self.manager.folder().as_ref(), &mut self.snapshot, &snapfile)?;
            info!(
                "Committed {snapfile} ({} docs in {})",
                self.seg_writer.segment().count(),
                self.seg_writer.segment().name()
            );
            self.state = CommitState::Published;

            match FilePurger::new(&self.manager).purge() {
                Ok(report) => debug!("Purge removed {} files", report.removed()),
                Err(e) => warn!("Purge after commit failed: {e}"),
            }
        }

        if let Some(mut merge_lock) = self.merge_lock.take() {
            merge_lock.release()?;
        }
        self.write_lock.release()
    }

    /// Give up: nothing is published and the locks are released. Files
    /// written so far are left for a later purge.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            CommitState::Idle | CommitState::Aborted => Ok(()),
            CommitState::Published => Err(GlaiveError::invalid_operation(
                "commit already published",
            )),
            _ => {
                info!("Aborting indexer for {}", self.seg_writer.segment().name());
                self.fail();
                Ok(())
            }
        }
    }

    fn fail(&mut self) {
        self.state = CommitState::Aborted;
        if let Err(e) = self.polyreader.close() {
            warn!("Failed to close reader: {e}");
        }
        if let Some(mut merge_lock) = self.merge_lock.take()
            && let Err(e) = merge_lock.release()
        {
            warn!("Failed to release merge lock: {e}");
        }
        if self.write_lock.is_held()
            && let Err(e) = self.write_lock.release()
        {
            warn!("Failed to release write lock: {e}");
        }
    }
}

/// Rename a prepared `<snapfile>.temp` into place.
pub(crate) fn publish_snapshot(
    folder: &dyn Folder,
    snapshot: &mut Snapshot,
    snapfile: &str,
) -> Result<()> {
    if folder.exists(snapfile) {
        return Err(GlaiveError::already_exists(format!(
            "snapshot file '{snapfile}'"
        )));
    }
    let temp = format!("{snapfile}{TEMP_SUFFIX}");
    folder.rename(&temp, snapfile)?;
    snapshot.set_path(Some(snapfile.to_string()));
    Ok(())
}
