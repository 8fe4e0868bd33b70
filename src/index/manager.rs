//! Index-wide policy: locks, file naming, merge data and segment recycling.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{GlaiveError, Result};
use crate::index::data::DataReader;
use crate::index::deletions::DeletionsWriter;
use crate::index::file_names::{self, MERGE_DATA_FILE, SNAPSHOT_EXT, SNAPSHOT_PREFIX};
use crate::index::poly_reader::PolyReader;
use crate::index::seg_reader::SegReader;
use crate::index::snapshot::Snapshot;
use crate::storage::lock::{ExclusiveLock, LockFactory, SharedLock};
use crate::storage::{Folder, write_file_atomic};

/// Name of the lock serializing index modifications.
pub const WRITE_LOCK_NAME: &str = "write";

/// Name of the lock held by a background merge.
pub const MERGE_LOCK_NAME: &str = "merge";

/// Name of the lock held while purging or pinning a snapshot.
pub const DELETION_LOCK_NAME: &str = "deletion";

/// Segments with at least this fraction of deleted documents get rewritten.
const DELETION_RATIO_THRESHOLD: f64 = 0.1;

/// Timeout and retry interval of one lock class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPolicy {
    /// How long to keep retrying, in milliseconds.
    pub timeout_ms: u64,
    /// Pause between attempts, in milliseconds.
    pub interval_ms: u64,
}

impl LockPolicy {
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        LockPolicy {
            timeout_ms,
            interval_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy::new(1000, 100)
    }
}

/// Configuration for an [`IndexManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexManagerConfig {
    /// Host identity recorded in lock markers. Defaults to the machine's
    /// host name.
    pub host: Option<String>,
    /// Policy of the write lock.
    pub write_lock: LockPolicy,
    /// Policy of the merge lock.
    pub merge_lock: LockPolicy,
    /// Policy of the deletion lock.
    pub deletion_lock: LockPolicy,
    /// Policy of snapshot read locks.
    pub snapshot_read_lock: LockPolicy,
    /// Markers older than this are stale regardless of their holder.
    pub stale_after_ms: Option<u64>,
}

impl Default for IndexManagerConfig {
    fn default() -> Self {
        IndexManagerConfig {
            host: None,
            write_lock: LockPolicy::new(1000, 100),
            merge_lock: LockPolicy::new(0, 1000),
            deletion_lock: LockPolicy::new(1000, 100),
            snapshot_read_lock: LockPolicy::new(1000, 100),
            stale_after_ms: None,
        }
    }
}

impl IndexManagerConfig {
    /// Load a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            GlaiveError::other(format!(
                "Failed to parse config {}: {e}",
                path.display()
            ))
        })
    }
}

/// Cutoff recorded by a background merge in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeData {
    /// Number of the segment the merge is writing. Segments numbered at or
    /// below it belong to the merge.
    pub cutoff: u64,
}

#[derive(Serialize, Deserialize)]
struct MergeDataFile {
    cutoff: String,
}

/// The machine's host name, or an empty string if it can't be determined.
#[cfg(unix)]
pub fn local_host() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for writes of its full length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return host_from_env();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

#[cfg(not(unix))]
pub fn local_host() -> String {
    host_from_env()
}

fn host_from_env() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_default()
}

/// Policy object shared by every client of one index.
#[derive(Debug, Clone)]
pub struct IndexManager {
    folder: Arc<dyn Folder>,
    host: String,
    config: IndexManagerConfig,
    lock_factory: LockFactory,
}

impl IndexManager {
    /// Create a manager with default settings.
    pub fn new(folder: Arc<dyn Folder>) -> Self {
        Self::with_config(folder, IndexManagerConfig::default())
    }

    /// Create a manager from an explicit configuration.
    pub fn with_config(folder: Arc<dyn Folder>, config: IndexManagerConfig) -> Self {
        let host = config.host.clone().unwrap_or_else(local_host);
        let lock_factory = LockFactory::new(Arc::clone(&folder), host.clone())
            .with_stale_after(config.stale_after_ms.map(Duration::from_millis));
        IndexManager {
            folder,
            host,
            config,
            lock_factory,
        }
    }

    pub fn folder(&self) -> &Arc<dyn Folder> {
        &self.folder
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> &IndexManagerConfig {
        &self.config
    }

    pub fn lock_factory(&self) -> &LockFactory {
        &self.lock_factory
    }

    pub fn with_write_lock(mut self, policy: LockPolicy) -> Self {
        self.config.write_lock = policy;
        self
    }

    pub fn with_merge_lock(mut self, policy: LockPolicy) -> Self {
        self.config.merge_lock = policy;
        self
    }

    pub fn with_deletion_lock(mut self, policy: LockPolicy) -> Self {
        self.config.deletion_lock = policy;
        self
    }

    pub fn with_snapshot_read_lock(mut self, policy: LockPolicy) -> Self {
        self.config.snapshot_read_lock = policy;
        self
    }

    fn exclusive(&self, name: &str, policy: LockPolicy) -> ExclusiveLock {
        self.lock_factory
            .make_lock(name, policy.timeout(), policy.interval())
    }

    /// Lock required to modify the index.
    pub fn make_write_lock(&self) -> ExclusiveLock {
        self.exclusive(WRITE_LOCK_NAME, self.config.write_lock)
    }

    /// Lock held for the duration of a background merge.
    pub fn make_merge_lock(&self) -> ExclusiveLock {
        self.exclusive(MERGE_LOCK_NAME, self.config.merge_lock)
    }

    /// Lock serializing purges against readers pinning a snapshot.
    pub fn make_deletion_lock(&self) -> ExclusiveLock {
        self.exclusive(DELETION_LOCK_NAME, self.config.deletion_lock)
    }

    /// Shared lock pinning the files of one snapshot.
    pub fn make_snapshot_read_lock(&self, snapshot_file: &str) -> Result<SharedLock> {
        let name = snapshot_file
            .strip_suffix(SNAPSHOT_EXT)
            .unwrap_or(snapshot_file);
        if !name.starts_with(SNAPSHOT_PREFIX) {
            return Err(GlaiveError::invalid_operation(format!(
                "Not a snapshot filename: {snapshot_file}"
            )));
        }
        let policy = self.config.snapshot_read_lock;
        Ok(self
            .lock_factory
            .make_shared_lock(name, policy.timeout(), policy.interval()))
    }

    /// Name for the next snapshot, one generation past every snapshot present.
    pub fn make_snapshot_filename(&self) -> Result<String> {
        let files = file_names::snapshot_files(self.folder.as_ref())?;
        let max_gen = files
            .iter()
            .map(|f| file_names::extract_gen(f))
            .max()
            .unwrap_or(0);
        Ok(file_names::snapshot_name(max_gen + 1))
    }

    /// Highest segment number a snapshot references, 0 if none.
    pub fn highest_seg_num(snapshot: &Snapshot) -> u64 {
        snapshot
            .list()
            .iter()
            .filter_map(|entry| file_names::segment_number(entry))
            .max()
            .unwrap_or(0)
    }

    /// Number for a new segment, above every number still in use.
    ///
    /// That covers the latest snapshot, older snapshots a reader may have
    /// pinned, segment directories still on disk and a recorded merge cutoff.
    pub fn next_seg_num(&self, latest: &Snapshot) -> Result<u64> {
        let folder = self.folder.as_ref();
        let mut highest = Self::highest_seg_num(latest);
        for entry in folder.list("")? {
            if let Some(num) = file_names::segment_number(&entry) {
                highest = highest.max(num);
            }
        }
        for file in file_names::snapshot_files(folder)? {
            match Snapshot::open(folder, Some(file.as_str())) {
                Ok(snapshot) => highest = highest.max(Self::highest_seg_num(&snapshot)),
                Err(e) => warn!("Skipping {file} while numbering a new segment: {e}"),
            }
        }
        if let Some(data) = self.read_merge_data()? {
            highest = highest.max(data.cutoff);
        }
        Ok(highest + 1)
    }

    /// Record the cutoff of a background merge.
    ///
    /// A cutoff lower than the one already on disk is rejected.
    pub fn write_merge_data(&self, cutoff: u64) -> Result<()> {
        if let Some(existing) = self.read_merge_data()?
            && existing.cutoff > cutoff
        {
            return Err(GlaiveError::invalid_operation(format!(
                "merge cutoff {cutoff} is below the recorded {}",
                existing.cutoff
            )));
        }
        let record = MergeDataFile {
            cutoff: cutoff.to_string(),
        };
        let bytes = serde_json::to_vec(&record)?;
        write_file_atomic(self.folder.as_ref(), MERGE_DATA_FILE, &bytes)?;
        debug!("Wrote merge data with cutoff {cutoff}");
        Ok(())
    }

    /// The recorded merge cutoff, if a merge is or was in progress.
    pub fn read_merge_data(&self) -> Result<Option<MergeData>> {
        if !self.folder.exists(MERGE_DATA_FILE) {
            return Ok(None);
        }
        let bytes = self.folder.slurp_file(MERGE_DATA_FILE)?;
        let record: MergeDataFile = serde_json::from_slice(&bytes)?;
        let cutoff = record.cutoff.parse().map_err(|_| {
            GlaiveError::index(format!("Invalid merge cutoff: {}", record.cutoff))
        })?;
        Ok(Some(MergeData { cutoff }))
    }

    /// Remove the merge record. Returns whether one existed.
    pub fn remove_merge_data(&self) -> Result<bool> {
        self.folder.delete(MERGE_DATA_FILE)
    }

    /// Choose the segments that should be merged away or dropped.
    ///
    /// Only segments numbered above `cutoff` are considered. With `optimize`
    /// every candidate is returned.
    pub fn recycle(
        &self,
        reader: &PolyReader,
        del_writer: &DeletionsWriter,
        cutoff: u64,
        optimize: bool,
    ) -> Vec<Arc<SegReader>> {
        let candidates: Vec<Arc<SegReader>> = reader
            .seg_readers()
            .iter()
            .filter(|r| r.seg_num() > cutoff)
            .cloned()
            .collect();
        if optimize {
            return candidates;
        }

        let live = |r: &SegReader| {
            r.doc_max()
                .saturating_sub(del_writer.seg_del_count(r.seg_name()))
        };

        let (mut recycled, mut rest): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|r| live(r) == 0);
        rest.sort_by_key(|r| live(r));

        let counts: Vec<u32> = rest.iter().map(|r| live(r)).collect();
        let threshold = Self::choose_sparse(&counts);
        let remainder = rest.split_off(threshold);
        recycled.extend(rest);

        for r in remainder {
            let ratio = del_writer.seg_del_count(r.seg_name()) as f64 / r.doc_max() as f64;
            if ratio >= DELETION_RATIO_THRESHOLD {
                recycled.push(r);
            }
        }

        debug!(
            "Recycling {} of {} segments above cutoff {cutoff}",
            recycled.len(),
            reader.seg_readers().len()
        );
        recycled
    }

    /// How many of the smallest segments to merge together.
    ///
    /// `doc_counts` must be sorted ascending. Small segments are taken while
    /// their combined size stays below a Fibonacci bound on the number of
    /// segments that would remain; a lone segment is never chosen.
    pub fn choose_sparse(doc_counts: &[u32]) -> usize {
        let num_candidates = doc_counts.len();
        let mut threshold = 0;
        let mut total_docs: u64 = 0;

        for (i, &count) in doc_counts.iter().enumerate() {
            let num_segs_when_done = num_candidates - threshold + 1;
            total_docs += u64::from(count);
            if total_docs < fibonacci(num_segs_when_done + 5) {
                threshold = i + 1;
            }
        }

        if threshold == 1 { 0 } else { threshold }
    }
}

fn fibonacci(n: usize) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a.saturating_add(b));
    }
    a
}
