//! # Glaive
//!
//! Index lifecycle and concurrency management for segmented search indexes.
//!
//! ## Features
//!
//! - Immutable, versioned snapshots published by a single atomic rename
//! - Advisory exclusive and shared locks with stale-holder detection
//! - Two-phase commits that leave the previous snapshot intact on failure
//! - Segment recycling with Fibonacci-sized sparse merges
//! - Background merging that runs alongside indexers
//! - Purging that never removes files a reader still depends on
//! - Pluggable storage: local filesystem or memory

pub mod analysis;
pub mod cli;
pub mod document;
pub mod error;
pub mod index;
pub mod search;
pub mod storage;

pub mod prelude {
    pub use crate::document::Document;
    pub use crate::error::{GlaiveError, Result};
    pub use crate::index::data::DataReader;
    pub use crate::index::{
        BackgroundMerger, CommitState, FilePurger, IndexManager, IndexManagerConfig, Indexer,
        IndexerOptions, LockPolicy, PolyReader, Snapshot,
    };
    pub use crate::search::IndexSearcher;
    pub use crate::storage::lock::Lock;
    pub use crate::storage::{Folder, FolderConfig, FolderFactory, FsFolder, RamFolder};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
