//! Storage abstraction layer for Glaive.
//!
//! Every index lives inside a [`Folder`]: a hierarchical, byte-addressable
//! namespace of files and directories addressed by `/`-separated relative
//! paths. The index lifecycle code only ever talks to this trait, so the
//! filesystem and memory backends can be swapped without touching it.
//!
//! # Architecture
//!
//! - **Folder trait**: Unified interface for all storage backends
//! - **FolderConfig enum**: Type-safe configuration for supported backends
//! - **FolderFactory**: Helper for constructing concrete folder instances
//! - **lock**: Advisory exclusive and shared locks built on a folder
//!
//! # Example
//!
//! ```
//! use glaive::storage::{FolderConfig, FolderFactory};
//! use glaive::storage::memory::RamFolderConfig;
//!
//! # fn main() -> glaive::error::Result<()> {
//! let folder = FolderFactory::create(FolderConfig::Ram(RamFolderConfig::default()))?;
//! folder.write_file("notes/hello.txt", b"hello")?;
//! assert_eq!(folder.slurp_file("notes/hello.txt")?, b"hello");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GlaiveError, Result};

pub mod file;
pub mod lock;
pub mod memory;

pub use file::{FsFolder, FsFolderConfig};
pub use memory::{RamFolder, RamFolderConfig};

/// File metadata information.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes.
    pub size: u64,

    /// Last modified time (seconds since epoch).
    pub modified: u64,

    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// A hierarchical storage namespace holding one index.
///
/// Paths are relative and `/`-separated. Writing a file implicitly creates
/// its parent directories.
pub trait Folder: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, path: &str) -> Result<Box<dyn FolderInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, path: &str) -> Result<Box<dyn FolderOutput>>;

    /// Atomically create a file that must not exist yet.
    ///
    /// Fails with [`GlaiveError::AlreadyExists`] when the path is taken. Of
    /// any number of concurrent callers racing for one path, exactly one
    /// succeeds.
    fn create_new_output(&self, path: &str) -> Result<Box<dyn FolderOutput>>;

    /// Whether a file or directory exists at the path.
    fn exists(&self, path: &str) -> bool;

    /// Whether the path names a directory.
    fn is_directory(&self, path: &str) -> bool;

    /// Create a directory and any missing parents. Existing directories are fine.
    fn mkdir(&self, path: &str) -> Result<()>;

    /// List the immediate children of a directory, sorted. `""` is the root.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Rename a file, atomically replacing any existing file at `to`.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Create a second name for a file. Fails if `to` exists.
    fn hard_link(&self, from: &str, to: &str) -> Result<()>;

    /// Delete a file or an empty directory. Returns whether anything was removed.
    fn delete(&self, path: &str) -> Result<bool>;

    /// Delete a file or a directory with all of its contents.
    fn delete_tree(&self, path: &str) -> Result<bool>;

    /// Get file metadata.
    fn metadata(&self, path: &str) -> Result<FileMetadata>;

    /// Sync all pending writes to the medium.
    fn sync(&self) -> Result<()>;

    /// Read a whole file into memory.
    fn slurp_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut input = self.open_input(path)?;
        let mut data = Vec::with_capacity(input.size()? as usize);
        input.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Write a whole file, replacing previous contents.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut output = self.create_output(path)?;
        output.write_all(data)?;
        output.close()
    }

    /// Recursively list every file below a directory, as paths relative to the root.
    fn list_r(&self, dir: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in self.list(dir)? {
            let path = join_path(dir, &entry);
            if self.is_directory(&path) {
                files.extend(self.list_r(&path)?);
            } else {
                files.push(path);
            }
        }
        Ok(files)
    }
}

/// A trait for reading data from a folder.
pub trait FolderInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;
}

/// A trait for writing data to a folder.
pub trait FolderOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Close the output stream, making its contents visible.
    fn close(&mut self) -> Result<()>;
}

impl FolderInput for Box<dyn FolderInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }
}

impl FolderOutput for Box<dyn FolderOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Write a file under a temporary name, then rename it into place.
///
/// Readers observe either the old contents or the complete new contents.
pub fn write_file_atomic(folder: &dyn Folder, path: &str, data: &[u8]) -> Result<()> {
    let temp = format!("{path}.{}.temp", uuid::Uuid::new_v4().simple());
    let written = folder
        .write_file(&temp, data)
        .and_then(|_| folder.rename(&temp, path));
    if written.is_err() {
        let _ = folder.delete(&temp);
    }
    written
}

/// Join a directory and an entry name. An empty directory is the root.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Split a path into its parent directory (`""` for the root) and last component.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

/// Storage configuration enum that specifies which backend to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FolderConfig {
    /// Local filesystem directory.
    Fs(FsFolderConfig),

    /// Process-local memory.
    Ram(RamFolderConfig),
}

impl Default for FolderConfig {
    fn default() -> Self {
        FolderConfig::Ram(RamFolderConfig::default())
    }
}

/// Factory for creating folders from configuration.
pub struct FolderFactory;

impl FolderFactory {
    /// Create a new folder instance based on configuration.
    pub fn create(config: FolderConfig) -> Result<Arc<dyn Folder>> {
        match config {
            FolderConfig::Fs(fs_config) => Ok(Arc::new(FsFolder::new(fs_config)?)),
            FolderConfig::Ram(ram_config) => Ok(Arc::new(RamFolder::new(ram_config))),
        }
    }

    /// Open an existing directory on local disk with default settings.
    pub fn open_fs<P: AsRef<std::path::Path>>(path: P) -> Result<Arc<dyn Folder>> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(GlaiveError::not_found(format!(
                "index directory {}",
                path.display()
            )));
        }
        Self::create(FolderConfig::Fs(FsFolderConfig::new(path)))
    }
}
