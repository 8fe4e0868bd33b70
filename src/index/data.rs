//! Component reader and writer interfaces.
//!
//! Each kind of per-segment data (stored documents, postings, deletions)
//! has a writer that fills a new segment and a reader that serves an
//! existing one. [`SegWriter`](crate::index::seg_writer::SegWriter) drives
//! the writers through the [`DataWriter`] trait.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Result;
use crate::index::seg_reader::SegReader;
use crate::index::segment::Segment;
use crate::storage::Folder;

/// Maps document ids of an old segment onto a new segment.
///
/// Deleted documents map to `None`; survivors get consecutive new ids
/// starting at the offset the map was generated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMap {
    map: Vec<Option<u32>>,
}

impl DocMap {
    /// Build a map from explicit entries.
    pub fn new(map: Vec<Option<u32>>) -> Self {
        DocMap { map }
    }

    /// New id of an old document, `None` when it was deleted.
    pub fn get(&self, old: u32) -> Option<u32> {
        self.map.get(old as usize).copied().flatten()
    }

    /// Number of old documents covered.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map covers no documents.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of documents that survive.
    pub fn live_count(&self) -> u32 {
        self.map.iter().filter(|m| m.is_some()).count() as u32
    }

    /// Iterate over `(old, new)` pairs of surviving documents.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.map
            .iter()
            .enumerate()
            .filter_map(|(old, new)| new.map(|new| (old as u32, new)))
    }
}

/// Writes one component of a new segment.
pub trait DataWriter: Send + std::fmt::Debug {
    /// Component name, also the key of its segment metadata block.
    fn name(&self) -> &'static str;

    /// Add a freshly indexed document under a new-segment id.
    fn add_inverted_doc(&mut self, doc: &Document, doc_id: u32) -> Result<()>;

    /// Copy the surviving documents of a segment from another index.
    fn add_segment(&mut self, reader: &SegReader, doc_map: &DocMap) -> Result<()>;

    /// Fold a segment of this index into the new one. Its directory goes
    /// away once the new snapshot is published.
    fn merge_segment(&mut self, reader: &SegReader, doc_map: &DocMap) -> Result<()> {
        self.add_segment(reader, doc_map)
    }

    /// Note that a segment is being dropped without copying anything.
    fn delete_segment(&mut self, _reader: &SegReader) -> Result<()> {
        Ok(())
    }

    /// Write out the component's files and metadata.
    fn finish(&mut self, folder: &dyn Folder, segment: &mut Segment) -> Result<()>;
}

/// Read-side view shared by single-segment and composite readers.
pub trait DataReader {
    /// Segments covered by this reader, in id order.
    fn segments(&self) -> Vec<&Segment>;

    /// One past the highest document id.
    fn doc_max(&self) -> u32;

    /// Number of deleted documents.
    fn del_count(&self) -> u32;

    /// Number of live documents.
    fn doc_count(&self) -> u32 {
        self.doc_max() - self.del_count()
    }
}
