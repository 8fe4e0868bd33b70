//! Stored document component.

use serde_json::json;

use crate::document::Document;
use crate::error::{GlaiveError, Result};
use crate::index::data::{DataWriter, DocMap};
use crate::index::seg_reader::SegReader;
use crate::index::segment::Segment;
use crate::storage::{Folder, write_file_atomic};

/// Metadata key and component name.
pub const DOCUMENTS: &str = "documents";

/// File holding a segment's stored documents.
pub const DOCUMENTS_FILE: &str = "documents.json";

/// Buffers stored documents for a new segment.
#[derive(Debug, Default)]
pub struct DocWriter {
    docs: Vec<Document>,
}

impl DocWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        DocWriter::default()
    }

    fn push(&mut self, doc: Document, doc_id: u32) -> Result<()> {
        if doc_id as usize != self.docs.len() {
            return Err(GlaiveError::index(format!(
                "document id {doc_id} out of sequence, expected {}",
                self.docs.len()
            )));
        }
        self.docs.push(doc);
        Ok(())
    }
}

impl DataWriter for DocWriter {
    fn name(&self) -> &'static str {
        DOCUMENTS
    }

    fn add_inverted_doc(&mut self, doc: &Document, doc_id: u32) -> Result<()> {
        self.push(doc.clone(), doc_id)
    }

    fn add_segment(&mut self, reader: &SegReader, doc_map: &DocMap) -> Result<()> {
        for (old, new) in doc_map.iter() {
            let doc = reader.documents().fetch(old).ok_or_else(|| {
                GlaiveError::index(format!(
                    "{} has no stored document {old}",
                    reader.seg_name()
                ))
            })?;
            self.push(doc.clone(), new)?;
        }
        Ok(())
    }

    fn finish(&mut self, folder: &dyn Folder, segment: &mut Segment) -> Result<()> {
        let bytes = serde_json::to_vec(&self.docs)?;
        write_file_atomic(folder, &segment.file_path(DOCUMENTS_FILE), &bytes)?;
        segment.store_metadata(
            DOCUMENTS,
            json!({"format": 1, "file": DOCUMENTS_FILE, "count": self.docs.len()}),
        )
    }
}

/// Serves a segment's stored documents.
#[derive(Debug, Default)]
pub struct DocReader {
    docs: Vec<Document>,
}

impl DocReader {
    /// Load the stored documents of a segment.
    pub fn open(folder: &dyn Folder, segment: &Segment) -> Result<Self> {
        if segment.fetch_metadata(DOCUMENTS).is_none() {
            return Ok(DocReader::default());
        }
        let bytes = folder.slurp_file(&segment.file_path(DOCUMENTS_FILE))?;
        let docs: Vec<Document> = serde_json::from_slice(&bytes)?;
        if docs.len() != segment.count() as usize {
            return Err(GlaiveError::index(format!(
                "{} stores {} documents but records {}",
                segment.name(),
                docs.len(),
                segment.count()
            )));
        }
        Ok(DocReader { docs })
    }

    /// Fetch a stored document by segment-local id, deleted or not.
    pub fn fetch(&self, doc_id: u32) -> Option<&Document> {
        self.docs.get(doc_id as usize)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
