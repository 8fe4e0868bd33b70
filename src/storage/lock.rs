//! Advisory locks built on a [`Folder`].
//!
//! A lock is a marker file under `locks/` created with the folder's atomic
//! create-if-absent primitive. The marker records who holds it (host, pid,
//! a per-instance token and the acquisition time) so that a lock left
//! behind by a crashed process can be recognised and cleared.
//!
//! Two flavours exist:
//!
//! - [`ExclusiveLock`]: one holder at a time, marker `locks/<name>.lock`.
//! - [`SharedLock`]: any number of holders, markers `locks/<name>-<n>.lock`.
//!   Shared locks never exclude each other; they exist so that other parties
//!   can see that something still depends on the named resource.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GlaiveError, Result};
use crate::storage::{Folder, join_path};

/// Directory holding every lock marker.
pub const LOCK_DIR: &str = "locks";

/// Suffix of the marker held while a stale marker is being cleared.
const CLEARING_SUFFIX: &str = ".clearing";

/// A clearing marker older than this was left by a clearer that died.
const CLEARING_EXPIRY: Duration = Duration::from_secs(30);

lazy_static! {
    static ref LOCK_NAME: Regex = Regex::new(r"^[A-Za-z0-9._-]+$").unwrap();
}

/// Contents of a lock marker file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Lock name.
    pub name: String,
    /// Host the holder runs on.
    pub host: String,
    /// Process id of the holder.
    pub pid: u32,
    /// Identifies the lock instance that wrote the marker.
    pub token: String,
    /// When the marker was written.
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(name: &str, host: &str) -> Self {
        LockRecord {
            name: name.to_string(),
            host: host.to_string(),
            pid: std::process::id(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        }
    }
}

/// Common interface of exclusive and shared locks.
pub trait Lock: Send + std::fmt::Debug {
    /// Get the name of the lock.
    fn name(&self) -> &str;

    /// How long [`Lock::obtain`] keeps retrying.
    fn timeout(&self) -> Duration;

    /// Pause between attempts in [`Lock::obtain`].
    fn interval(&self) -> Duration;

    /// Make a single non-blocking attempt to take the lock.
    ///
    /// Fails with [`GlaiveError::LockFailed`] when another party holds it.
    fn request(&mut self) -> Result<()>;

    /// Give the lock up.
    ///
    /// Fails with [`GlaiveError::LockNotHeld`] if this instance does not hold it.
    fn release(&mut self) -> Result<()>;

    /// Whether this instance currently holds the lock.
    fn is_held(&self) -> bool;

    /// Whether anyone holds the lock.
    fn is_locked(&self) -> Result<bool>;

    /// Remove markers left behind by holders that provably died.
    ///
    /// Returns whether anything was removed.
    fn clear_stale(&mut self) -> Result<bool>;

    /// Retry [`Lock::request`] every interval until it succeeds or the timeout elapses.
    fn obtain(&mut self) -> Result<()> {
        let timeout = self.timeout();
        let interval = self.interval();
        let deadline = Instant::now() + timeout;

        loop {
            match self.request() {
                Ok(()) => return Ok(()),
                Err(GlaiveError::LockFailed(_)) => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if interval.is_zero() || now >= deadline {
                return Err(GlaiveError::lock_timeout(format!(
                    "couldn't obtain lock '{}' within {} ms",
                    self.name(),
                    timeout.as_millis()
                )));
            }
            thread::sleep(interval.min(deadline - now));
        }
    }
}

/// Creates locks that share a folder, host identity and staleness policy.
#[derive(Debug, Clone)]
pub struct LockFactory {
    folder: Arc<dyn Folder>,
    host: String,
    stale_after: Option<Duration>,
}

impl LockFactory {
    /// Create a factory for locks on `folder` held on behalf of `host`.
    pub fn new(folder: Arc<dyn Folder>, host: impl Into<String>) -> Self {
        LockFactory {
            folder,
            host: host.into(),
            stale_after: None,
        }
    }

    /// Treat markers older than `grace` as stale regardless of host.
    pub fn with_stale_after(mut self, grace: Option<Duration>) -> Self {
        self.stale_after = grace;
        self
    }

    /// Host identifier written into markers.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Create an exclusive lock.
    pub fn make_lock(&self, name: &str, timeout: Duration, interval: Duration) -> ExclusiveLock {
        ExclusiveLock {
            ctx: self.clone(),
            name: name.to_string(),
            lock_path: join_path(LOCK_DIR, &format!("{name}.lock")),
            timeout,
            interval,
            token: None,
        }
    }

    /// Create a shared lock.
    pub fn make_shared_lock(&self, name: &str, timeout: Duration, interval: Duration) -> SharedLock {
        SharedLock {
            ctx: self.clone(),
            name: name.to_string(),
            timeout,
            interval,
            held: None,
        }
    }

    /// Describe every marker currently present in the folder.
    pub fn markers(&self) -> Result<Vec<LockMarker>> {
        if !self.folder.is_directory(LOCK_DIR) {
            return Ok(Vec::new());
        }
        let mut markers = Vec::new();
        for file in self.folder.list(LOCK_DIR)? {
            if !file.ends_with(".lock") {
                continue;
            }
            let path = join_path(LOCK_DIR, &file);
            let record = match self.read_marker(&path)? {
                MarkerState::Missing => continue,
                MarkerState::Unreadable => None,
                MarkerState::Held(record) => Some(record),
            };
            let stale = match &record {
                Some(record) => self.is_stale(record),
                None => self.is_unreadable_stale(&path)?,
            };
            markers.push(LockMarker {
                path,
                record,
                stale,
            });
        }
        Ok(markers)
    }

    /// Remove every stale marker in the folder. Returns how many were removed.
    pub fn clear_all_stale(&self) -> Result<usize> {
        let mut cleared = 0;
        for marker in self.markers()? {
            if marker.stale && self.clear_if_stale(&marker.path)? {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn is_stale(&self, record: &LockRecord) -> bool {
        if record.host == self.host && !process_alive(record.pid) {
            return true;
        }
        match self.stale_after {
            Some(grace) => (Utc::now() - record.acquired_at)
                .to_std()
                .is_ok_and(|age| age > grace),
            None => false,
        }
    }

    /// Write a marker unless one exists. Returns false when the path is taken.
    fn write_marker(&self, path: &str, record: &LockRecord) -> Result<bool> {
        self.folder.mkdir(LOCK_DIR)?;
        let mut output = match self.folder.create_new_output(path) {
            Ok(output) => output,
            Err(GlaiveError::AlreadyExists(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let written = serde_json::to_vec(record)
            .map_err(GlaiveError::from)
            .and_then(|bytes| output.write_all(&bytes).map_err(GlaiveError::from))
            .and_then(|_| output.close());
        if let Err(e) = written {
            drop(output);
            let _ = self.folder.delete(path);
            return Err(e);
        }
        Ok(true)
    }

    fn read_marker(&self, path: &str) -> Result<MarkerState> {
        let bytes = match self.folder.slurp_file(path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(MarkerState::Missing),
            Err(e) => return Err(e),
        };
        Ok(match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(record) => MarkerState::Held(record),
            Err(_) => MarkerState::Unreadable,
        })
    }

    /// Delete the marker only if it still carries `token`.
    ///
    /// Only the holder calls this on its own marker. Markers of other
    /// parties are removed through [`LockFactory::clear_if_stale`].
    fn remove_if_token(&self, path: &str, token: &str) -> Result<bool> {
        match self.read_marker(path)? {
            MarkerState::Held(record) if record.token == token => self.folder.delete(path),
            _ => Ok(false),
        }
    }

    /// Age of the file at `path` by its modification time, `None` if it is gone.
    fn marker_age(&self, path: &str) -> Result<Option<Duration>> {
        let metadata = match self.folder.metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let now = Utc::now().timestamp().max(0) as u64;
        Ok(Some(Duration::from_secs(now.saturating_sub(metadata.modified))))
    }

    /// An unreadable marker counts as stale once it is older than the grace period.
    fn is_unreadable_stale(&self, path: &str) -> Result<bool> {
        let Some(grace) = self.stale_after else {
            return Ok(false);
        };
        Ok(self.marker_age(path)?.is_some_and(|age| age > grace))
    }

    /// Clear the marker at `path` if its holder is provably gone.
    ///
    /// Clearing is serialized per marker through `<path>.clearing`: the
    /// marker is re-read while that is held and deleted only if it is still
    /// the one judged stale. A party that finds clearing under way backs off.
    fn clear_if_stale(&self, path: &str) -> Result<bool> {
        let judged = match self.read_marker(path)? {
            MarkerState::Missing => return Ok(false),
            MarkerState::Unreadable => {
                if !self.is_unreadable_stale(path)? {
                    debug!("Lock marker {path} is unreadable, leaving it in place");
                    return Ok(false);
                }
                None
            }
            MarkerState::Held(record) => {
                if !self.is_stale(&record) {
                    return Ok(false);
                }
                Some(record)
            }
        };

        let Some(guard) = self.enter_clearing(path)? else {
            debug!("Stale lock {path} is being cleared by another party");
            return Ok(false);
        };
        let cleared = self.remove_judged(path, judged.as_ref());
        let left = self.remove_if_token(&guard.0, &guard.1);
        let cleared = cleared?;
        left?;

        if cleared {
            match judged {
                Some(record) => warn!(
                    "Cleared stale lock {path} held by pid {} on '{}' since {}",
                    record.pid, record.host, record.acquired_at
                ),
                None => warn!("Cleared unreadable lock marker {path}"),
            }
        }
        Ok(cleared)
    }

    /// Delete the marker at `path` if it is still the one that was judged stale.
    fn remove_judged(&self, path: &str, judged: Option<&LockRecord>) -> Result<bool> {
        let unchanged = match (self.read_marker(path)?, judged) {
            (MarkerState::Held(current), Some(record)) => current.token == record.token,
            (MarkerState::Unreadable, None) => self.is_unreadable_stale(path)?,
            _ => false,
        };
        if unchanged {
            self.folder.delete(path)
        } else {
            Ok(false)
        }
    }

    /// Take the clearing marker for `path`. Returns its path and token.
    fn enter_clearing(&self, path: &str) -> Result<Option<(String, String)>> {
        let guard_path = format!("{path}{CLEARING_SUFFIX}");
        let record = LockRecord::new("clearing", &self.host);
        if self.write_marker(&guard_path, &record)? {
            return Ok(Some((guard_path, record.token)));
        }

        let abandoned = match self.read_marker(&guard_path)? {
            MarkerState::Missing => false,
            MarkerState::Held(other) if self.is_stale(&other) => true,
            _ => self
                .marker_age(&guard_path)?
                .is_some_and(|age| age > CLEARING_EXPIRY),
        };
        if abandoned
            && self.folder.delete(&guard_path)?
            && self.write_marker(&guard_path, &record)?
        {
            warn!("Took over abandoned clearing marker {guard_path}");
            return Ok(Some((guard_path, record.token)));
        }
        Ok(None)
    }
}

/// A lock marker found on disk.
#[derive(Debug, Clone)]
pub struct LockMarker {
    /// Path of the marker file.
    pub path: String,
    /// Parsed contents, `None` when the marker could not be read.
    pub record: Option<LockRecord>,
    /// Whether the holder is provably gone.
    pub stale: bool,
}

enum MarkerState {
    Missing,
    Unreadable,
    Held(LockRecord),
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    if pid <= 0 {
        return true;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn validate_name(name: &str) -> Result<()> {
    if LOCK_NAME.is_match(name) {
        Ok(())
    } else {
        Err(GlaiveError::invalid_operation(format!(
            "invalid lock name '{name}'"
        )))
    }
}

/// A lock with at most one holder.
///
/// Dropping a held lock releases it.
#[derive(Debug)]
pub struct ExclusiveLock {
    ctx: LockFactory,
    name: String,
    lock_path: String,
    timeout: Duration,
    interval: Duration,
    token: Option<String>,
}

impl ExclusiveLock {
    /// Path of the marker file.
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Read the current holder's record, if any.
    pub fn holder(&self) -> Result<Option<LockRecord>> {
        Ok(match self.ctx.read_marker(&self.lock_path)? {
            MarkerState::Held(record) => Some(record),
            _ => None,
        })
    }
}

impl Lock for ExclusiveLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn request(&mut self) -> Result<()> {
        validate_name(&self.name)?;
        if self.token.is_some() {
            return Err(GlaiveError::invalid_operation(format!(
                "lock '{}' is already held by this instance",
                self.name
            )));
        }

        let record = LockRecord::new(&self.name, self.ctx.host());
        let acquired = self.ctx.write_marker(&self.lock_path, &record)?
            || (self.ctx.clear_if_stale(&self.lock_path)?
                && self.ctx.write_marker(&self.lock_path, &record)?);

        if acquired {
            debug!("Obtained lock '{}'", self.name);
            self.token = Some(record.token);
            Ok(())
        } else {
            Err(GlaiveError::lock_failed(format!(
                "'{}' is held by another party",
                self.name
            )))
        }
    }

    fn release(&mut self) -> Result<()> {
        let token = self
            .token
            .take()
            .ok_or_else(|| GlaiveError::lock_not_held(self.name.clone()))?;
        if self.ctx.remove_if_token(&self.lock_path, &token)? {
            debug!("Released lock '{}'", self.name);
            Ok(())
        } else {
            Err(GlaiveError::lock_not_held(format!(
                "marker for '{}' no longer belongs to this instance",
                self.name
            )))
        }
    }

    fn is_held(&self) -> bool {
        self.token.is_some()
    }

    fn is_locked(&self) -> Result<bool> {
        Ok(self.ctx.folder.exists(&self.lock_path))
    }

    fn clear_stale(&mut self) -> Result<bool> {
        self.ctx.clear_if_stale(&self.lock_path)
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if self.token.is_some()
            && let Err(e) = self.release()
        {
            warn!("Failed to release lock '{}': {e}", self.name);
        }
    }
}

/// A lock that any number of parties can hold at once.
///
/// Dropping a held lock releases it.
#[derive(Debug)]
pub struct SharedLock {
    ctx: LockFactory,
    name: String,
    timeout: Duration,
    interval: Duration,
    /// Marker path and token while held.
    held: Option<(String, String)>,
}

impl SharedLock {
    /// Path of this instance's marker while held.
    pub fn lock_path(&self) -> Option<&str> {
        self.held.as_ref().map(|(path, _)| path.as_str())
    }

    fn slot_path(&self, slot: u32) -> String {
        join_path(LOCK_DIR, &format!("{}-{slot}.lock", self.name))
    }

    /// Marker paths of every holder.
    fn marker_paths(&self) -> Result<Vec<String>> {
        if !self.ctx.folder.is_directory(LOCK_DIR) {
            return Ok(Vec::new());
        }
        let prefix = format!("{}-", self.name);
        Ok(self
            .ctx
            .folder
            .list(LOCK_DIR)?
            .into_iter()
            .filter(|file| {
                file.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".lock"))
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            })
            .map(|file| join_path(LOCK_DIR, &file))
            .collect())
    }
}

impl Lock for SharedLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn request(&mut self) -> Result<()> {
        validate_name(&self.name)?;
        if self.held.is_some() {
            return Err(GlaiveError::invalid_operation(format!(
                "shared lock '{}' is already held by this instance",
                self.name
            )));
        }

        let record = LockRecord::new(&self.name, self.ctx.host());
        let mut slot = 1;
        loop {
            let path = self.slot_path(slot);
            if !self.ctx.folder.exists(&path) && self.ctx.write_marker(&path, &record)? {
                debug!("Obtained shared lock '{}' via {path}", self.name);
                self.held = Some((path, record.token));
                return Ok(());
            }
            slot += 1;
        }
    }

    fn release(&mut self) -> Result<()> {
        let (path, token) = self
            .held
            .take()
            .ok_or_else(|| GlaiveError::lock_not_held(self.name.clone()))?;
        if self.ctx.remove_if_token(&path, &token)? {
            debug!("Released shared lock '{}'", self.name);
            Ok(())
        } else {
            Err(GlaiveError::lock_not_held(format!(
                "marker {path} no longer belongs to this instance"
            )))
        }
    }

    fn is_held(&self) -> bool {
        self.held.is_some()
    }

    fn is_locked(&self) -> Result<bool> {
        Ok(!self.marker_paths()?.is_empty())
    }

    fn clear_stale(&mut self) -> Result<bool> {
        let mut cleared = false;
        for path in self.marker_paths()? {
            cleared |= self.ctx.clear_if_stale(&path)?;
        }
        Ok(cleared)
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        if self.held.is_some()
            && let Err(e) = self.release()
        {
            warn!("Failed to release shared lock '{}': {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RamFolder, RamFolderConfig};

    const DEAD_PID: u32 = 2_000_000_000;

    fn factory() -> (Arc<dyn Folder>, LockFactory) {
        let folder: Arc<dyn Folder> = Arc::new(RamFolder::new(RamFolderConfig::default()));
        let factory = LockFactory::new(Arc::clone(&folder), "localhost");
        (folder, factory)
    }

    fn plant_marker(folder: &Arc<dyn Folder>, path: &str, record: &LockRecord) {
        folder
            .write_file(path, &serde_json::to_vec(record).unwrap())
            .unwrap();
    }

    fn quick(factory: &LockFactory, name: &str) -> ExclusiveLock {
        factory.make_lock(name, Duration::ZERO, Duration::from_millis(10))
    }

    #[test]
    fn test_request_and_release() {
        let (folder, factory) = factory();
        let mut lock = quick(&factory, "write");

        lock.request().unwrap();
        assert!(lock.is_held());
        assert!(lock.is_locked().unwrap());
        assert!(folder.exists("locks/write.lock"));
        assert_eq!(lock.holder().unwrap().unwrap().host, "localhost");

        lock.release().unwrap();
        assert!(!lock.is_held());
        assert!(!folder.exists("locks/write.lock"));
    }

    #[test]
    fn test_second_holder_is_refused() {
        let (_folder, factory) = factory();
        let mut first = quick(&factory, "write");
        let mut second = quick(&factory, "write");

        first.request().unwrap();
        assert!(matches!(second.request(), Err(GlaiveError::LockFailed(_))));
        assert!(matches!(second.obtain(), Err(GlaiveError::LockTimeout(_))));

        first.release().unwrap();
        second.obtain().unwrap();
    }

    #[test]
    fn test_release_without_holding() {
        let (_folder, factory) = factory();
        let mut lock = quick(&factory, "merge");
        assert!(matches!(lock.release(), Err(GlaiveError::LockNotHeld(_))));
    }

    #[test]
    fn test_double_request_is_invalid() {
        let (_folder, factory) = factory();
        let mut lock = quick(&factory, "merge");
        lock.request().unwrap();
        assert!(matches!(
            lock.request(),
            Err(GlaiveError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_invalid_name() {
        let (_folder, factory) = factory();
        let mut lock = quick(&factory, "../escape");
        assert!(matches!(
            lock.request(),
            Err(GlaiveError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_drop_releases() {
        let (folder, factory) = factory();
        {
            let mut lock = quick(&factory, "write");
            lock.request().unwrap();
        }
        assert!(!folder.exists("locks/write.lock"));
    }

    #[test]
    fn test_dead_local_holder_is_stale() {
        let (folder, factory) = factory();
        let mut record = LockRecord::new("write", "localhost");
        record.pid = DEAD_PID;
        plant_marker(&folder, "locks/write.lock", &record);

        let mut lock = quick(&factory, "write");
        lock.request().unwrap();
        assert_ne!(lock.holder().unwrap().unwrap().pid, DEAD_PID);
    }

    #[test]
    fn test_remote_holder_is_not_stale_without_grace() {
        let (folder, factory) = factory();
        let mut record = LockRecord::new("write", "elsewhere");
        record.pid = DEAD_PID;
        record.acquired_at = Utc::now() - chrono::Duration::hours(5);
        plant_marker(&folder, "locks/write.lock", &record);

        let mut lock = quick(&factory, "write");
        assert!(!lock.clear_stale().unwrap());
        assert!(matches!(lock.request(), Err(GlaiveError::LockFailed(_))));

        let lenient = factory.with_stale_after(Some(Duration::from_secs(3600)));
        let mut lock = quick(&lenient, "write");
        assert!(lock.clear_stale().unwrap());
        lock.request().unwrap();
    }

    #[test]
    fn test_unreadable_marker_is_kept() {
        let (folder, factory) = factory();
        folder.write_file("locks/write.lock", b"garbage").unwrap();

        let mut lock = quick(&factory, "write");
        assert!(!lock.clear_stale().unwrap());
        assert!(lock.request().is_err());
        assert!(folder.exists("locks/write.lock"));
    }

    #[test]
    fn test_unreadable_marker_expires_with_grace() {
        let dir = tempfile::Builder::new()
            .prefix("test_unreadable_marker")
            .tempdir()
            .unwrap();
        let folder = crate::storage::FolderFactory::open_fs(dir.path()).unwrap();
        folder.write_file("locks/write.lock", b"").unwrap();

        let strict = LockFactory::new(Arc::clone(&folder), "localhost");
        let lenient = strict.clone().with_stale_after(Some(Duration::ZERO));
        // Modification times have whole-second resolution.
        thread::sleep(Duration::from_millis(1100));

        assert!(!quick(&strict, "write").clear_stale().unwrap());
        let markers = lenient.markers().unwrap();
        assert_eq!(markers.len(), 1);
        assert!(markers[0].record.is_none() && markers[0].stale);

        let mut lock = quick(&lenient, "write");
        lock.request().unwrap();
        assert!(lock.holder().unwrap().is_some());
        assert!(!folder.exists("locks/write.lock.clearing"));
    }

    #[test]
    fn test_clearing_in_progress_defers() {
        let (folder, factory) = factory();
        let mut dead = LockRecord::new("write", "localhost");
        dead.pid = DEAD_PID;
        plant_marker(&folder, "locks/write.lock", &dead);
        let busy = LockRecord::new("clearing", "localhost");
        plant_marker(&folder, "locks/write.lock.clearing", &busy);

        let mut lock = quick(&factory, "write");
        assert!(matches!(lock.request(), Err(GlaiveError::LockFailed(_))));
        assert_eq!(lock.holder().unwrap().unwrap().token, dead.token);
        assert_eq!(factory.markers().unwrap().len(), 1);

        // A clearer that died is taken over.
        let mut gone = busy;
        gone.pid = DEAD_PID;
        folder.delete("locks/write.lock.clearing").unwrap();
        plant_marker(&folder, "locks/write.lock.clearing", &gone);
        lock.request().unwrap();
        assert!(!folder.exists("locks/write.lock.clearing"));
    }

    #[test]
    fn test_release_after_being_cleared() {
        let (folder, factory) = factory();
        let mut lock = quick(&factory, "write");
        lock.request().unwrap();

        let mut intruder = LockRecord::new("write", "elsewhere");
        intruder.token = "someone-else".to_string();
        plant_marker(&folder, "locks/write.lock", &intruder);

        assert!(matches!(lock.release(), Err(GlaiveError::LockNotHeld(_))));
        assert!(folder.exists("locks/write.lock"));
    }

    #[test]
    fn test_shared_locks_coexist() {
        let (folder, factory) = factory();
        let mut a = factory.make_shared_lock("snapshot_1", Duration::ZERO, Duration::ZERO);
        let mut b = factory.make_shared_lock("snapshot_1", Duration::ZERO, Duration::ZERO);
        let other = factory.make_shared_lock("snapshot_2", Duration::ZERO, Duration::ZERO);

        a.obtain().unwrap();
        b.obtain().unwrap();
        assert_eq!(a.lock_path(), Some("locks/snapshot_1-1.lock"));
        assert_eq!(b.lock_path(), Some("locks/snapshot_1-2.lock"));
        assert!(a.is_locked().unwrap());
        assert!(!other.is_locked().unwrap());

        a.release().unwrap();
        assert!(b.is_locked().unwrap());
        b.release().unwrap();
        assert!(!b.is_locked().unwrap());
        assert!(folder.list("locks").unwrap().is_empty());
    }

    #[test]
    fn test_shared_lock_clear_stale() {
        let (folder, factory) = factory();
        let mut record = LockRecord::new("snapshot_3", "localhost");
        record.pid = DEAD_PID;
        plant_marker(&folder, "locks/snapshot_3-1.lock", &record);

        let mut lock = factory.make_shared_lock("snapshot_3", Duration::ZERO, Duration::ZERO);
        assert!(lock.is_locked().unwrap());
        assert!(lock.clear_stale().unwrap());
        assert!(!lock.is_locked().unwrap());
    }

    #[test]
    fn test_markers_and_clear_all_stale() {
        let (folder, factory) = factory();
        let mut live = quick(&factory, "write");
        live.request().unwrap();

        let mut dead = LockRecord::new("merge", "localhost");
        dead.pid = DEAD_PID;
        plant_marker(&folder, "locks/merge.lock", &dead);

        let markers = factory.markers().unwrap();
        assert_eq!(markers.len(), 2);
        assert!(markers.iter().any(|m| m.path == "locks/merge.lock" && m.stale));
        assert!(markers.iter().any(|m| m.path == "locks/write.lock" && !m.stale));

        assert_eq!(factory.clear_all_stale().unwrap(), 1);
        assert!(live.is_locked().unwrap());
    }
}
