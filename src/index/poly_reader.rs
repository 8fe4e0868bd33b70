//! Point-in-time reader over every segment of a snapshot.

use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use crate::document::Document;
use crate::error::{GlaiveError, Result};
use crate::index::data::DataReader;
use crate::index::deletions::DeletionsReader;
use crate::index::file_names;
use crate::index::manager::IndexManager;
use crate::index::seg_reader::SegReader;
use crate::index::segment::Segment;
use crate::index::snapshot::Snapshot;
use crate::storage::Folder;
use crate::storage::lock::{Lock, SharedLock};

/// How many times [`PolyReader::open`] chases a snapshot that was purged
/// between listing and locking it.
const MAX_OPEN_ATTEMPTS: usize = 10;

/// A composite reader over every segment of one snapshot.
///
/// Readers opened through [`PolyReader::open`] hold a shared read lock on
/// their snapshot file, which keeps the purger away from every file the
/// snapshot references until the reader is closed or dropped.
#[derive(Debug)]
pub struct PolyReader {
    snapshot: Snapshot,
    seg_readers: Vec<Arc<SegReader>>,
    offsets: Vec<u32>,
    read_lock: Option<SharedLock>,
}

impl PolyReader {
    /// Open the latest published snapshot under a read lock.
    ///
    /// Fails with [`GlaiveError::NotFound`] if the index has no snapshot.
    pub fn open(manager: &IndexManager) -> Result<Self> {
        let folder = manager.folder();
        for _ in 0..MAX_OPEN_ATTEMPTS {
            let Some(latest) = file_names::latest_snapshot(folder.as_ref())? else {
                return Err(GlaiveError::not_found("index contains no snapshot"));
            };

            let read_lock = Self::lock_snapshot(manager, &latest)?;
            if !folder.exists(&latest) {
                debug!("Snapshot {latest} vanished before it could be locked, retrying");
                continue;
            }

            let snapshot = Snapshot::open(folder.as_ref(), Some(latest.as_str()))?;
            let mut reader = Self::from_snapshot(folder.as_ref(), snapshot)?;
            reader.read_lock = Some(read_lock);
            return Ok(reader);
        }
        Err(GlaiveError::index(
            "couldn't open a snapshot: it kept being purged",
        ))
    }

    /// Open an already loaded snapshot, read-locking its file if it has one.
    pub fn open_snapshot(manager: &IndexManager, snapshot: Snapshot) -> Result<Self> {
        let read_lock = match snapshot.path() {
            Some(path) => Some(Self::lock_snapshot(manager, path)?),
            None => None,
        };
        let mut reader = Self::from_snapshot(manager.folder().as_ref(), snapshot)?;
        reader.read_lock = read_lock;
        Ok(reader)
    }

    /// Take a snapshot's read lock while holding the deletion lock, so no
    /// purge can slip in between.
    fn lock_snapshot(manager: &IndexManager, snapshot_file: &str) -> Result<SharedLock> {
        let mut deletion_lock = manager.make_deletion_lock();
        deletion_lock.obtain()?;
        let mut read_lock = manager.make_snapshot_read_lock(snapshot_file)?;
        read_lock.obtain()?;
        deletion_lock.release()?;
        Ok(read_lock)
    }

    /// Build a reader from a snapshot without taking any lock.
    pub fn from_snapshot(folder: &dyn Folder, snapshot: Snapshot) -> Result<Self> {
        let mut names: Vec<(u64, &str)> = snapshot
            .list()
            .iter()
            .filter_map(|entry| file_names::segment_number(entry).map(|n| (n, entry.as_str())))
            .collect();
        names.sort_unstable();

        let segments = names
            .par_iter()
            .map(|(_, name)| Segment::read_file(folder, name))
            .collect::<Result<Vec<_>>>()?;

        let seg_readers = segments
            .par_iter()
            .map(|segment| {
                let deletions = DeletionsReader::open(folder, segment, &segments)?;
                SegReader::open(folder, segment.clone(), deletions).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut offsets = Vec::with_capacity(seg_readers.len());
        let mut doc_max = 0u32;
        for reader in &seg_readers {
            offsets.push(doc_max);
            doc_max += reader.doc_max();
        }

        Ok(PolyReader {
            snapshot,
            seg_readers,
            offsets,
            read_lock: None,
        })
    }

    /// A reader over nothing.
    pub fn empty() -> Self {
        PolyReader {
            snapshot: Snapshot::new(),
            seg_readers: Vec::new(),
            offsets: Vec::new(),
            read_lock: None,
        }
    }

    /// The snapshot being read.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Segment readers, ordered by segment number.
    pub fn seg_readers(&self) -> &[Arc<SegReader>] {
        &self.seg_readers
    }

    /// First reader-wide document id of each segment.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Find the segment holding a reader-wide document id.
    ///
    /// Returns the segment's position and the segment-local id.
    pub fn locate(&self, doc_id: u32) -> Option<(usize, u32)> {
        let tick = self
            .offsets
            .partition_point(|&offset| offset <= doc_id)
            .checked_sub(1)?;
        let local = doc_id - self.offsets[tick];
        (local < self.seg_readers[tick].doc_max()).then_some((tick, local))
    }

    /// Fetch a live document by reader-wide id.
    pub fn fetch_doc(&self, doc_id: u32) -> Option<&Document> {
        let (tick, local) = self.locate(doc_id)?;
        self.seg_readers[tick].fetch_doc(local)
    }

    /// Number of live documents containing `term` in `field`.
    pub fn doc_freq(&self, field: &str, term: &str) -> u32 {
        self.seg_readers
            .iter()
            .map(|r| r.term_docs(field, term).len() as u32)
            .sum()
    }

    /// Reader-wide ids of live documents containing `term` in `field`.
    pub fn term_docs(&self, field: &str, term: &str) -> Vec<u32> {
        self.seg_readers
            .iter()
            .zip(&self.offsets)
            .flat_map(|(reader, &offset)| {
                reader
                    .term_docs(field, term)
                    .into_iter()
                    .map(move |id| id + offset)
            })
            .collect()
    }

    /// Whether this reader holds a read lock on its snapshot.
    pub fn is_locked(&self) -> bool {
        self.read_lock.as_ref().is_some_and(|l| l.is_held())
    }

    /// Release the snapshot read lock. The reader stays usable in memory.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut lock) = self.read_lock.take()
            && lock.is_held()
        {
            lock.release()?;
        }
        Ok(())
    }
}

impl DataReader for PolyReader {
    fn segments(&self) -> Vec<&Segment> {
        self.seg_readers.iter().map(|r| r.segment()).collect()
    }

    fn doc_max(&self) -> u32 {
        self.seg_readers.iter().map(|r| r.doc_max()).sum()
    }

    fn del_count(&self) -> u32 {
        self.seg_readers.iter().map(|r| r.del_count()).sum()
    }
}
