//! Local filesystem folder implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{GlaiveError, Result};
use crate::storage::{FileMetadata, Folder, FolderInput, FolderOutput};

/// Configuration for [`FsFolder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsFolderConfig {
    /// Root directory of the index.
    pub path: PathBuf,

    /// Buffer size for I/O operations.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Whether every closed output is fsync'ed.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
}

fn default_buffer_size() -> usize {
    65536
}

fn default_sync_writes() -> bool {
    true
}

impl FsFolderConfig {
    /// Create a configuration rooted at the given directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FsFolderConfig {
            path: path.as_ref().to_path_buf(),
            buffer_size: default_buffer_size(),
            sync_writes: default_sync_writes(),
        }
    }
}

/// A folder backed by a directory on local disk.
#[derive(Debug)]
pub struct FsFolder {
    /// The root directory for storage.
    directory: PathBuf,
    /// Storage configuration.
    config: FsFolderConfig,
}

impl FsFolder {
    /// Open (creating if needed) a folder rooted at `config.path`.
    pub fn new(config: FsFolderConfig) -> Result<Self> {
        let directory = config.path.clone();

        if !directory.exists() {
            fs::create_dir_all(&directory)
                .map_err(|e| GlaiveError::storage(format!("Failed to create directory: {e}")))?;
        }

        if !directory.is_dir() {
            return Err(GlaiveError::storage(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }

        Ok(FsFolder { directory, config })
    }

    /// The root directory on disk.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.directory.clone()
        } else {
            self.directory.join(path)
        }
    }

    fn make_parents(&self, full: &Path) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open_output(&self, path: &str, exclusive: bool) -> Result<Box<dyn FolderOutput>> {
        let full = self.full_path(path);
        self.make_parents(&full)?;

        let mut options = OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }

        let file = options.open(&full).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => GlaiveError::already_exists(path.to_string()),
            _ => GlaiveError::Io(e),
        })?;

        Ok(Box::new(FsOutput::new(
            file,
            self.config.buffer_size,
            self.config.sync_writes,
        )))
    }
}

fn not_found_or_io(path: &str, e: std::io::Error) -> GlaiveError {
    if e.kind() == ErrorKind::NotFound {
        GlaiveError::not_found(path.to_string())
    } else {
        GlaiveError::Io(e)
    }
}

impl Folder for FsFolder {
    fn open_input(&self, path: &str) -> Result<Box<dyn FolderInput>> {
        let file = File::open(self.full_path(path)).map_err(|e| not_found_or_io(path, e))?;
        Ok(Box::new(FsInput::new(file, self.config.buffer_size)?))
    }

    fn create_output(&self, path: &str) -> Result<Box<dyn FolderOutput>> {
        self.open_output(path, false)
    }

    fn create_new_output(&self, path: &str) -> Result<Box<dyn FolderOutput>> {
        self.open_output(path, true)
    }

    fn exists(&self, path: &str) -> bool {
        self.full_path(path).exists()
    }

    fn is_directory(&self, path: &str) -> bool {
        self.full_path(path).is_dir()
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(self.full_path(dir)).map_err(|e| not_found_or_io(dir, e))?;
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.full_path(to);
        self.make_parents(&target)?;
        fs::rename(self.full_path(from), target).map_err(|e| not_found_or_io(from, e))?;
        Ok(())
    }

    fn hard_link(&self, from: &str, to: &str) -> Result<()> {
        let target = self.full_path(to);
        self.make_parents(&target)?;
        fs::hard_link(self.full_path(from), target).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => GlaiveError::already_exists(to.to_string()),
            _ => not_found_or_io(from, e),
        })?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path);
        let removed = if full.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        };
        match removed {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GlaiveError::Io(e)),
        }
    }

    fn delete_tree(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path);
        let removed = if full.is_dir() {
            fs::remove_dir_all(&full)
        } else {
            fs::remove_file(&full)
        };
        match removed {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GlaiveError::Io(e)),
        }
    }

    fn metadata(&self, path: &str) -> Result<FileMetadata> {
        let metadata = fs::metadata(self.full_path(path)).map_err(|e| not_found_or_io(path, e))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(FileMetadata {
            size: metadata.len(),
            modified,
            is_dir: metadata.is_dir(),
        })
    }

    fn sync(&self) -> Result<()> {
        #[cfg(unix)]
        File::open(&self.directory)?.sync_all()?;
        Ok(())
    }
}

/// A file input implementation.
#[derive(Debug)]
pub struct FsInput {
    reader: BufReader<File>,
    size: u64,
}

impl FsInput {
    fn new(file: File, buffer_size: usize) -> Result<Self> {
        let size = file
            .metadata()
            .map_err(|e| GlaiveError::storage(format!("Failed to get file metadata: {e}")))?
            .len();
        let reader = BufReader::with_capacity(buffer_size, file);

        Ok(FsInput { reader, size })
    }
}

impl Read for FsInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FsInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl FolderInput for FsInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

/// A file output implementation.
#[derive(Debug)]
pub struct FsOutput {
    writer: BufWriter<File>,
    sync_writes: bool,
    closed: bool,
}

impl FsOutput {
    fn new(file: File, buffer_size: usize, sync_writes: bool) -> Self {
        FsOutput {
            writer: BufWriter::with_capacity(buffer_size, file),
            sync_writes,
            closed: false,
        }
    }
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl FolderOutput for FsOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| GlaiveError::storage(format!("Failed to flush: {e}")))?;

        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| GlaiveError::storage(format!("Failed to sync: {e}")))?;

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.sync_writes {
            self.flush_and_sync()?;
        } else {
            self.writer.flush()?;
        }
        self.closed = true;
        Ok(())
    }
}
