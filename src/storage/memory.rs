//! In-memory folder implementation for testing and ephemeral indexes.

use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{GlaiveError, Result};
use crate::storage::{FileMetadata, Folder, FolderInput, FolderOutput, split_path};

/// Configuration for [`RamFolder`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RamFolderConfig {
    /// Initial capacity of the file table.
    #[serde(default)]
    pub initial_capacity: usize,
}

#[derive(Debug, Default)]
struct RamState {
    files: HashMap<String, Arc<[u8]>>,
    dirs: BTreeSet<String>,
}

impl RamState {
    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    fn has_children(&self, dir: &str) -> bool {
        let prefix = format!("{dir}/");
        self.files.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }

    /// Register every ancestor directory of `path`.
    fn make_parents(&mut self, path: &str) -> Result<()> {
        let (parent, _) = split_path(path);
        if parent.is_empty() {
            return Ok(());
        }
        let mut current = String::new();
        for component in parent.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            if self.files.contains_key(&current) {
                return Err(GlaiveError::storage(format!(
                    "'{current}' is a file, not a directory"
                )));
            }
            self.dirs.insert(current.clone());
        }
        Ok(())
    }
}

/// A folder whose files live in process memory.
///
/// Cloning a `RamFolder` yields another handle onto the same files, so
/// several indexers and searchers in one process can share an index.
#[derive(Debug, Clone, Default)]
pub struct RamFolder {
    state: Arc<Mutex<RamState>>,
}

impl RamFolder {
    /// Create a new, empty memory folder.
    pub fn new(config: RamFolderConfig) -> Self {
        let state = RamState {
            files: HashMap::with_capacity(config.initial_capacity),
            dirs: BTreeSet::new(),
        };
        RamFolder {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.state
            .lock()
            .files
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }
}

impl Folder for RamFolder {
    fn open_input(&self, path: &str) -> Result<Box<dyn FolderInput>> {
        let state = self.state.lock();
        let data = state
            .files
            .get(path)
            .ok_or_else(|| GlaiveError::not_found(path.to_string()))?;
        Ok(Box::new(RamInput::new(Arc::clone(data))))
    }

    fn create_output(&self, path: &str) -> Result<Box<dyn FolderOutput>> {
        let mut state = self.state.lock();
        if state.is_dir(path) {
            return Err(GlaiveError::storage(format!("'{path}' is a directory")));
        }
        state.make_parents(path)?;
        state.files.insert(path.to_string(), Arc::from(Vec::new()));
        Ok(Box::new(RamOutput::new(
            path.to_string(),
            Arc::clone(&self.state),
        )))
    }

    fn create_new_output(&self, path: &str) -> Result<Box<dyn FolderOutput>> {
        let mut state = self.state.lock();
        if state.exists(path) {
            return Err(GlaiveError::already_exists(path.to_string()));
        }
        state.make_parents(path)?;
        state.files.insert(path.to_string(), Arc::from(Vec::new()));
        Ok(Box::new(RamOutput::new(
            path.to_string(),
            Arc::clone(&self.state),
        )))
    }

    fn exists(&self, path: &str) -> bool {
        self.state.lock().exists(path)
    }

    fn is_directory(&self, path: &str) -> bool {
        self.state.lock().is_dir(path)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.files.contains_key(path) {
            return Err(GlaiveError::already_exists(path.to_string()));
        }
        state.make_parents(path)?;
        if !path.is_empty() {
            state.dirs.insert(path.to_string());
        }
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        if !state.is_dir(dir) {
            return Err(GlaiveError::not_found(format!("directory '{dir}'")));
        }
        let children: BTreeSet<String> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter_map(|path| {
                let (parent, name) = split_path(path);
                (parent == dir && !name.is_empty()).then(|| name.to_string())
            })
            .collect();
        Ok(children.into_iter().collect())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(data) = state.files.get(from).cloned() {
            if state.is_dir(to) {
                return Err(GlaiveError::storage(format!("'{to}' is a directory")));
            }
            state.make_parents(to)?;
            state.files.remove(from);
            state.files.insert(to.to_string(), data);
            return Ok(());
        }
        if !state.dirs.contains(from) {
            return Err(GlaiveError::not_found(from.to_string()));
        }
        if state.exists(to) {
            return Err(GlaiveError::already_exists(to.to_string()));
        }
        state.make_parents(to)?;

        let prefix = format!("{from}/");
        let moved_files: Vec<String> = state
            .files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved_files {
            if let Some(data) = state.files.remove(&old) {
                state
                    .files
                    .insert(format!("{to}/{}", &old[prefix.len()..]), data);
            }
        }
        let moved_dirs: Vec<String> = state
            .dirs
            .iter()
            .filter(|d| d.as_str() == from || d.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved_dirs {
            state.dirs.remove(&old);
            state.dirs.insert(format!("{to}{}", &old[from.len()..]));
        }
        Ok(())
    }

    fn hard_link(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock();
        let data = state
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| GlaiveError::not_found(from.to_string()))?;
        if state.exists(to) {
            return Err(GlaiveError::already_exists(to.to_string()));
        }
        state.make_parents(to)?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if state.files.remove(path).is_some() {
            return Ok(true);
        }
        if state.dirs.contains(path) {
            if state.has_children(path) {
                return Err(GlaiveError::storage(format!(
                    "directory '{path}' is not empty"
                )));
            }
            state.dirs.remove(path);
            return Ok(true);
        }
        Ok(false)
    }

    fn delete_tree(&self, path: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if state.files.remove(path).is_some() {
            return Ok(true);
        }
        if !state.dirs.remove(path) {
            return Ok(false);
        }
        let prefix = format!("{path}/");
        state.files.retain(|k, _| !k.starts_with(&prefix));
        state.dirs.retain(|d| !d.starts_with(&prefix));
        Ok(true)
    }

    fn metadata(&self, path: &str) -> Result<FileMetadata> {
        let state = self.state.lock();
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if let Some(data) = state.files.get(path) {
            Ok(FileMetadata {
                size: data.len() as u64,
                modified: now,
                is_dir: false,
            })
        } else if state.is_dir(path) {
            Ok(FileMetadata {
                size: 0,
                modified: now,
                is_dir: true,
            })
        } else {
            Err(GlaiveError::not_found(path.to_string()))
        }
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct RamInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl RamInput {
    fn new(data: Arc<[u8]>) -> Self {
        RamInput {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for RamInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for RamInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl FolderInput for RamInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// A memory-based output implementation.
///
/// Written bytes become visible to readers when the output is closed or dropped.
#[derive(Debug)]
pub struct RamOutput {
    path: String,
    buffer: Vec<u8>,
    state: Arc<Mutex<RamState>>,
    closed: bool,
}

impl RamOutput {
    fn new(path: String, state: Arc<Mutex<RamState>>) -> Self {
        RamOutput {
            path,
            buffer: Vec::new(),
            state,
            closed: false,
        }
    }
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl FolderOutput for RamOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data: Arc<[u8]> = Arc::from(std::mem::take(&mut self.buffer));
            self.state.lock().files.insert(self.path.clone(), data);
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for RamOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
