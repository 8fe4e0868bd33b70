//! Deletions component.
//!
//! Deletions against segment X are never written into X itself, since
//! segments are immutable once published. Instead the segment being
//! written stores `deletions-X.bv` and records it in its `deletions`
//! metadata. When several segments carry a file for X, the one in the
//! highest-numbered segment is authoritative.
//!
//! File layout (little endian): `doc_max: u32`, `del_count: u32`, the bit
//! vector bytes, then a CRC32 of everything before it.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use ahash::AHashMap;
use bit_vec::BitVec;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{GlaiveError, Result};
use crate::index::data::{DataReader, DataWriter, DocMap};
use crate::index::poly_reader::PolyReader;
use crate::index::seg_reader::SegReader;
use crate::index::segment::Segment;
use crate::storage::{Folder, write_file_atomic};

/// Metadata key and component name.
pub const DELETIONS: &str = "deletions";

/// Deletions files recorded in one segment's metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionsMeta {
    /// Target segment name to file description.
    pub files: BTreeMap<String, DeletionsFileMeta>,
}

/// One deletions file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionsFileMeta {
    /// File name inside the holding segment's directory.
    pub filename: String,
    /// Number of deleted documents recorded.
    pub count: u32,
}

impl DeletionsMeta {
    /// Parse the `deletions` metadata block of a segment.
    pub fn of(segment: &Segment) -> Result<Self> {
        match segment.fetch_metadata(DELETIONS) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                GlaiveError::index(format!(
                    "{} has malformed deletions metadata: {e}",
                    segment.name()
                ))
            }),
            None => Ok(DeletionsMeta::default()),
        }
    }
}

fn deletions_file_name(target: &str) -> String {
    format!("deletions-{target}.bv")
}

fn encode_bits(bits: &BitVec, del_count: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(12 + bits.len() / 8 + 1);
    buf.write_u32::<LittleEndian>(bits.len() as u32)?;
    buf.write_u32::<LittleEndian>(del_count)?;
    buf.extend_from_slice(&bits.to_bytes());
    let crc = crc32fast::hash(&buf);
    buf.write_u32::<LittleEndian>(crc)?;
    Ok(buf)
}

fn decode_bits(bytes: &[u8], path: &str, doc_max: u32) -> Result<(BitVec, u32)> {
    let corrupt = |what: &str| GlaiveError::index(format!("deletions file {path}: {what}"));
    if bytes.len() < 12 {
        return Err(corrupt("truncated"));
    }
    let (body, mut trailer) = bytes.split_at(bytes.len() - 4);
    if trailer.read_u32::<LittleEndian>()? != crc32fast::hash(body) {
        return Err(corrupt("checksum mismatch"));
    }

    let mut header = Cursor::new(body);
    let stored_max = header.read_u32::<LittleEndian>()?;
    let count = header.read_u32::<LittleEndian>()?;
    if stored_max != doc_max {
        return Err(corrupt(&format!(
            "covers {stored_max} documents, segment has {doc_max}"
        )));
    }

    let mut bits = BitVec::from_bytes(&body[8..]);
    if bits.len() < doc_max as usize {
        return Err(corrupt("bit vector too short"));
    }
    bits.truncate(doc_max as usize);
    if bits.iter().filter(|b| *b).count() as u32 != count {
        return Err(corrupt("deletion count mismatch"));
    }
    Ok((bits, count))
}

/// Generate the map from a segment's ids to ids in a segment being written.
///
/// Survivors are numbered consecutively from `offset`.
pub fn generate_doc_map(deletions: Option<&BitVec>, doc_max: u32, offset: u32) -> DocMap {
    let mut next = offset;
    let map = (0..doc_max as usize)
        .map(|old| {
            if deletions.is_some_and(|bits| bits.get(old).unwrap_or(false)) {
                None
            } else {
                next += 1;
                Some(next - 1)
            }
        })
        .collect();
    DocMap::new(map)
}

/// Read-side view of a segment's deletions.
#[derive(Debug, Clone, Default)]
pub struct DeletionsReader {
    bits: Option<BitVec>,
    del_count: u32,
    source: Option<String>,
}

impl DeletionsReader {
    /// Resolve the authoritative deletions of `target` among `segments`.
    pub fn open(folder: &dyn Folder, target: &Segment, segments: &[Segment]) -> Result<Self> {
        let mut best: Option<(&Segment, DeletionsFileMeta)> = None;
        for segment in segments {
            let meta = DeletionsMeta::of(segment)?;
            if let Some(file) = meta.files.get(target.name())
                && best
                    .as_ref()
                    .is_none_or(|(holder, _)| segment.number() > holder.number())
            {
                best = Some((segment, file.clone()));
            }
        }

        let Some((holder, file)) = best else {
            return Ok(DeletionsReader::default());
        };
        let path = holder.file_path(&file.filename);
        let bytes = folder.slurp_file(&path)?;
        let (bits, count) = decode_bits(&bytes, &path, target.count())?;
        Ok(DeletionsReader {
            bits: Some(bits),
            del_count: count,
            source: Some(holder.name().to_string()),
        })
    }

    /// Whether a segment-local document is deleted.
    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.bits
            .as_ref()
            .and_then(|bits| bits.get(doc_id as usize))
            .unwrap_or(false)
    }

    /// Number of deleted documents.
    pub fn del_count(&self) -> u32 {
        self.del_count
    }

    /// The deletion bits, if any deletions exist.
    pub fn bits(&self) -> Option<&BitVec> {
        self.bits.as_ref()
    }

    /// Name of the segment whose file supplied these deletions.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Iterate over deleted segment-local ids.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits
            .iter()
            .flat_map(|bits| bits.iter().enumerate())
            .filter_map(|(id, deleted)| deleted.then_some(id as u32))
    }
}

/// Accumulates new deletions against the segments of a reader.
#[derive(Debug)]
pub struct DeletionsWriter {
    seg_readers: Vec<Arc<SegReader>>,
    ticks: AHashMap<String, usize>,
    offsets: Vec<u32>,
    bit_vecs: Vec<BitVec>,
    counts: Vec<u32>,
    updated: Vec<bool>,
    retired: Vec<bool>,
}

impl DeletionsWriter {
    /// Start from the deletions already visible through `reader`.
    pub fn new(reader: &PolyReader) -> Self {
        let seg_readers: Vec<Arc<SegReader>> = reader.seg_readers().to_vec();
        let ticks = seg_readers
            .iter()
            .enumerate()
            .map(|(tick, r)| (r.seg_name().to_string(), tick))
            .collect();
        let bit_vecs = seg_readers
            .iter()
            .map(|r| {
                r.deletions()
                    .bits()
                    .cloned()
                    .unwrap_or_else(|| BitVec::from_elem(r.doc_max() as usize, false))
            })
            .collect();
        let counts = seg_readers.iter().map(|r| r.del_count()).collect();
        let n = seg_readers.len();

        DeletionsWriter {
            seg_readers,
            ticks,
            offsets: reader.offsets().to_vec(),
            bit_vecs,
            counts,
            updated: vec![false; n],
            retired: vec![false; n],
        }
    }

    fn mark(&mut self, tick: usize, doc_id: u32) -> bool {
        let bits = &mut self.bit_vecs[tick];
        if bits.get(doc_id as usize).unwrap_or(true) {
            return false;
        }
        bits.set(doc_id as usize, true);
        self.counts[tick] += 1;
        self.updated[tick] = true;
        true
    }

    /// Delete every document containing `term` in `field`.
    ///
    /// Returns how many documents were newly deleted.
    pub fn delete_by_term(&mut self, field: &str, term: &str) -> u32 {
        let mut deleted = 0;
        for tick in 0..self.seg_readers.len() {
            let reader = Arc::clone(&self.seg_readers[tick]);
            for &doc_id in reader.postings().docs(field, term) {
                if self.mark(tick, doc_id) {
                    deleted += 1;
                }
            }
        }
        debug!("Deleted {deleted} documents by term {field}:{term}");
        deleted
    }

    /// Delete a document by its reader-wide id.
    ///
    /// Returns whether it was newly deleted.
    pub fn delete_by_doc_id(&mut self, doc_id: u32) -> Result<bool> {
        let tick = self
            .offsets
            .partition_point(|&offset| offset <= doc_id)
            .checked_sub(1)
            .ok_or_else(|| GlaiveError::invalid_operation(format!("no document {doc_id}")))?;
        let local = doc_id - self.offsets[tick];
        if local >= self.seg_readers[tick].doc_max() {
            return Err(GlaiveError::invalid_operation(format!(
                "no document {doc_id}"
            )));
        }
        Ok(self.mark(tick, local))
    }

    /// Whether there are deletions that still need writing.
    pub fn updated(&self) -> bool {
        self.updated
            .iter()
            .zip(&self.retired)
            .any(|(updated, retired)| *updated && !*retired)
    }

    /// Deleted-document count of a segment, including pending deletions.
    pub fn seg_del_count(&self, seg_name: &str) -> u32 {
        self.ticks.get(seg_name).map_or(0, |&tick| self.counts[tick])
    }

    /// Deletion bits of a segment, including pending deletions.
    pub fn seg_deletions(&self, seg_name: &str) -> Option<&BitVec> {
        self.ticks.get(seg_name).map(|&tick| &self.bit_vecs[tick])
    }

    /// Map a segment's surviving documents onto ids starting at `offset`.
    pub fn doc_map(&self, reader: &SegReader, offset: u32) -> DocMap {
        generate_doc_map(
            self.seg_deletions(reader.seg_name()),
            reader.doc_max(),
            offset,
        )
    }

    /// Stop tracking a segment that is leaving the index.
    ///
    /// Deletions files stored inside it that are still authoritative for
    /// surviving segments get rewritten on finish.
    fn retire(&mut self, reader: &SegReader) {
        if let Some(&tick) = self.ticks.get(reader.seg_name()) {
            self.retired[tick] = true;
        }
        for tick in 0..self.seg_readers.len() {
            if !self.retired[tick]
                && self.seg_readers[tick].deletions().source() == Some(reader.seg_name())
            {
                self.updated[tick] = true;
            }
        }
    }
}

impl DataWriter for DeletionsWriter {
    fn name(&self) -> &'static str {
        DELETIONS
    }

    fn add_inverted_doc(&mut self, _doc: &Document, _doc_id: u32) -> Result<()> {
        Ok(())
    }

    fn add_segment(&mut self, _reader: &SegReader, _doc_map: &DocMap) -> Result<()> {
        Ok(())
    }

    fn merge_segment(&mut self, reader: &SegReader, _doc_map: &DocMap) -> Result<()> {
        self.retire(reader);
        Ok(())
    }

    fn delete_segment(&mut self, reader: &SegReader) -> Result<()> {
        self.retire(reader);
        Ok(())
    }

    fn finish(&mut self, folder: &dyn Folder, segment: &mut Segment) -> Result<()> {
        let mut meta = DeletionsMeta::default();
        for tick in 0..self.seg_readers.len() {
            if !self.updated[tick] || self.retired[tick] {
                continue;
            }
            let target = self.seg_readers[tick].seg_name();
            let filename = deletions_file_name(target);
            let bytes = encode_bits(&self.bit_vecs[tick], self.counts[tick])?;
            write_file_atomic(folder, &segment.file_path(&filename), &bytes)?;
            meta.files.insert(
                target.to_string(),
                DeletionsFileMeta {
                    filename,
                    count: self.counts[tick],
                },
            );
            self.updated[tick] = false;
        }
        if !meta.files.is_empty() {
            debug!(
                "{} records deletions for {} segments",
                segment.name(),
                meta.files.len()
            );
            segment.store_metadata(DELETIONS, serde_json::to_value(&meta)?)?;
        }
        Ok(())
    }
}
