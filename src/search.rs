//! Read-only, point-in-time access to an index.

use std::sync::Arc;

use crate::document::Document;
use crate::error::Result;
use crate::index::data::DataReader;
use crate::index::manager::{IndexManager, IndexManagerConfig};
use crate::index::poly_reader::PolyReader;
use crate::storage::Folder;

/// Searches the snapshot that was latest when it was opened.
///
/// Commits made afterwards are not visible; open a new searcher to see
/// them. The snapshot's files stay on disk until the searcher is closed or
/// dropped.
#[derive(Debug)]
pub struct IndexSearcher {
    reader: PolyReader,
}

impl IndexSearcher {
    /// Open the latest snapshot in `folder` with default settings.
    pub fn open(folder: Arc<dyn Folder>) -> Result<Self> {
        Self::with_config(folder, IndexManagerConfig::default())
    }

    pub fn with_config(folder: Arc<dyn Folder>, config: IndexManagerConfig) -> Result<Self> {
        Self::with_manager(&IndexManager::with_config(folder, config))
    }

    pub fn with_manager(manager: &IndexManager) -> Result<Self> {
        Ok(IndexSearcher {
            reader: PolyReader::open(manager)?,
        })
    }

    /// Number of live documents.
    pub fn doc_count(&self) -> u32 {
        self.reader.doc_count()
    }

    /// One past the highest document id.
    pub fn doc_max(&self) -> u32 {
        self.reader.doc_max()
    }

    /// Number of live documents containing `term` in `field`.
    pub fn doc_freq(&self, field: &str, term: &str) -> u32 {
        self.reader.doc_freq(field, term)
    }

    /// Ids of the live documents containing `term` in `field`, ascending.
    pub fn term_docs(&self, field: &str, term: &str) -> Vec<u32> {
        self.reader.term_docs(field, term)
    }

    /// Fetch a live document.
    pub fn fetch_doc(&self, doc_id: u32) -> Option<&Document> {
        self.reader.fetch_doc(doc_id)
    }

    /// The underlying reader.
    pub fn reader(&self) -> &PolyReader {
        &self.reader
    }

    /// Release the snapshot's read lock.
    pub fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}
