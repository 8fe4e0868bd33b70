//! Index lifecycle: snapshots, segments, readers, writers and the commit
//! protocol tying them together.

pub mod background_merger;
pub mod data;
pub mod deletions;
pub mod documents;
pub mod file_names;
pub mod file_purger;
pub mod indexer;
pub mod manager;
pub mod poly_reader;
pub mod postings;
pub mod seg_reader;
pub mod seg_writer;
pub mod segment;
pub mod snapshot;

pub use background_merger::BackgroundMerger;
pub use file_purger::{FilePurger, PurgeReport};
pub use indexer::{CommitState, Indexer, IndexerOptions};
pub use manager::{IndexManager, IndexManagerConfig, LockPolicy, MergeData};
pub use poly_reader::PolyReader;
pub use segment::Segment;
pub use snapshot::Snapshot;
