//! Reader for a single segment.

use crate::document::Document;
use crate::error::Result;
use crate::index::data::DataReader;
use crate::index::deletions::DeletionsReader;
use crate::index::documents::DocReader;
use crate::index::postings::PostingListReader;
use crate::index::segment::Segment;
use crate::storage::Folder;

/// Serves one segment's documents, postings and deletions.
#[derive(Debug)]
pub struct SegReader {
    segment: Segment,
    documents: DocReader,
    postings: PostingListReader,
    deletions: DeletionsReader,
}

impl SegReader {
    /// Open a segment whose deletions have already been resolved.
    pub fn open(folder: &dyn Folder, segment: Segment, deletions: DeletionsReader) -> Result<Self> {
        let documents = DocReader::open(folder, &segment)?;
        let postings = PostingListReader::open(folder, &segment)?;
        Ok(SegReader {
            segment,
            documents,
            postings,
            deletions,
        })
    }

    /// The segment's metadata.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// The segment's directory name.
    pub fn seg_name(&self) -> &str {
        self.segment.name()
    }

    /// The segment's number.
    pub fn seg_num(&self) -> u64 {
        self.segment.number()
    }

    /// Stored documents component.
    pub fn documents(&self) -> &DocReader {
        &self.documents
    }

    /// Postings component.
    pub fn postings(&self) -> &PostingListReader {
        &self.postings
    }

    /// Deletions component.
    pub fn deletions(&self) -> &DeletionsReader {
        &self.deletions
    }

    /// Whether a segment-local document is deleted.
    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.deletions.is_deleted(doc_id)
    }

    /// Fetch a live document by segment-local id.
    pub fn fetch_doc(&self, doc_id: u32) -> Option<&Document> {
        if self.is_deleted(doc_id) {
            return None;
        }
        self.documents.fetch(doc_id)
    }

    /// Live segment-local ids of documents containing `term` in `field`.
    pub fn term_docs(&self, field: &str, term: &str) -> Vec<u32> {
        self.postings
            .docs(field, term)
            .iter()
            .copied()
            .filter(|&id| !self.is_deleted(id))
            .collect()
    }
}

impl DataReader for SegReader {
    fn segments(&self) -> Vec<&Segment> {
        vec![&self.segment]
    }

    fn doc_max(&self) -> u32 {
        self.segment.count()
    }

    fn del_count(&self) -> u32 {
        self.deletions.del_count()
    }
}
