//! Error types for the Glaive library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`GlaiveError`] enum. Lock contention, missing files and corrupt
//! manifests each have their own variant so callers can tell a busy index
//! apart from a broken one.
//!
//! # Examples
//!
//! ```
//! use glaive::error::{GlaiveError, Result};
//!
//! fn busy() -> Result<()> {
//!     Err(GlaiveError::lock_timeout("write"))
//! }
//!
//! assert!(busy().unwrap_err().is_lock_contention());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Glaive operations.
#[derive(Error, Debug)]
pub enum GlaiveError {
    /// I/O errors from the underlying storage medium.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A lock could not be obtained before its timeout elapsed.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// A single non-blocking lock request found the lock held.
    #[error("Lock failed: {0}")]
    LockFailed(String),

    /// Release was called on a lock this instance does not hold.
    #[error("Lock not held: {0}")]
    LockNotHeld(String),

    /// A snapshot file exists but cannot be understood.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// A named file or index does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An exclusive create hit an existing file.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with GlaiveError.
pub type Result<T> = std::result::Result<T, GlaiveError>;

impl GlaiveError {
    /// Create a new lock timeout error.
    pub fn lock_timeout<S: Into<String>>(msg: S) -> Self {
        GlaiveError::LockTimeout(msg.into())
    }

    /// Create a new lock failed error.
    pub fn lock_failed<S: Into<String>>(msg: S) -> Self {
        GlaiveError::LockFailed(msg.into())
    }

    /// Create a new lock not held error.
    pub fn lock_not_held<S: Into<String>>(msg: S) -> Self {
        GlaiveError::LockNotHeld(msg.into())
    }

    /// Create a new corrupt snapshot error.
    pub fn corrupt_snapshot<S: Into<String>>(msg: S) -> Self {
        GlaiveError::CorruptSnapshot(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        GlaiveError::NotFound(msg.into())
    }

    /// Create a new already exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        GlaiveError::AlreadyExists(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        GlaiveError::Storage(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        GlaiveError::Index(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        GlaiveError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        GlaiveError::Other(msg.into())
    }

    /// Whether this error means another party currently holds a lock.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            GlaiveError::LockTimeout(_) | GlaiveError::LockFailed(_)
        )
    }

    /// Whether this error reports a missing file or index.
    pub fn is_not_found(&self) -> bool {
        match self {
            GlaiveError::NotFound(_) => true,
            GlaiveError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
