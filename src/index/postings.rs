//! Exact-term postings component.
//!
//! For every field, maps each term to the sorted list of segment-local
//! document ids containing it.

use std::collections::BTreeMap;

use serde_json::json;

use crate::analysis::{normalize_term, tokenize};
use crate::document::Document;
use crate::error::{GlaiveError, Result};
use crate::index::data::{DataWriter, DocMap};
use crate::index::seg_reader::SegReader;
use crate::index::segment::Segment;
use crate::storage::{Folder, write_file_atomic};

/// Metadata key and component name.
pub const POSTINGS: &str = "postings";

/// File holding a segment's postings.
pub const POSTINGS_FILE: &str = "postings.json";

type FieldPostings = BTreeMap<String, BTreeMap<String, Vec<u32>>>;

/// Accumulates postings for a new segment.
#[derive(Debug, Default)]
pub struct PostingWriter {
    fields: FieldPostings,
}

impl PostingWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        PostingWriter::default()
    }

    fn add_posting(&mut self, field: &str, term: &str, doc_id: u32) {
        let docs = self
            .fields
            .entry(field.to_string())
            .or_default()
            .entry(term.to_string())
            .or_default();
        if docs.last() != Some(&doc_id) {
            docs.push(doc_id);
        }
    }
}

impl DataWriter for PostingWriter {
    fn name(&self) -> &'static str {
        POSTINGS
    }

    fn add_inverted_doc(&mut self, doc: &Document, doc_id: u32) -> Result<()> {
        for (field, value) in doc.fields() {
            for token in tokenize(value) {
                self.add_posting(field, &token, doc_id);
            }
        }
        Ok(())
    }

    fn add_segment(&mut self, reader: &SegReader, doc_map: &DocMap) -> Result<()> {
        // Ids from one source segment arrive in increasing order, and every
        // source maps above the previous ones, so lists stay sorted.
        for (field, terms) in reader.postings().fields() {
            for (term, docs) in terms {
                for &old in docs {
                    if let Some(new) = doc_map.get(old) {
                        self.add_posting(field, term, new);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, folder: &dyn Folder, segment: &mut Segment) -> Result<()> {
        for field in self.fields.keys() {
            segment.add_field(field);
        }
        let bytes = serde_json::to_vec(&self.fields)?;
        write_file_atomic(folder, &segment.file_path(POSTINGS_FILE), &bytes)?;
        let term_count: usize = self.fields.values().map(BTreeMap::len).sum();
        segment.store_metadata(
            POSTINGS,
            json!({"format": 1, "file": POSTINGS_FILE, "terms": term_count}),
        )
    }
}

/// Serves a segment's postings.
#[derive(Debug, Default)]
pub struct PostingListReader {
    fields: FieldPostings,
}

impl PostingListReader {
    /// Load the postings of a segment.
    pub fn open(folder: &dyn Folder, segment: &Segment) -> Result<Self> {
        if segment.fetch_metadata(POSTINGS).is_none() {
            return Ok(PostingListReader::default());
        }
        let path = segment.file_path(POSTINGS_FILE);
        let bytes = folder.slurp_file(&path)?;
        let fields: FieldPostings = serde_json::from_slice(&bytes)
            .map_err(|e| GlaiveError::index(format!("Failed to parse {path}: {e}")))?;
        Ok(PostingListReader { fields })
    }

    /// Document ids containing `term` in `field`, deleted or not.
    pub fn docs(&self, field: &str, term: &str) -> &[u32] {
        self.fields
            .get(field)
            .and_then(|terms| terms.get(&normalize_term(term)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every field with its term table.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Vec<u32>>)> {
        self.fields.iter().map(|(f, t)| (f.as_str(), t))
    }

    /// Number of distinct terms in a field.
    pub fn term_count(&self, field: &str) -> usize {
        self.fields.get(field).map_or(0, BTreeMap::len)
    }
}
