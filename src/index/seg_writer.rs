//! Writer producing one new segment.

use std::sync::Arc;

use log::{debug, info};

use crate::document::Document;
use crate::error::Result;
use crate::index::data::{DataReader, DataWriter, DocMap};
use crate::index::deletions::DeletionsWriter;
use crate::index::documents::DocWriter;
use crate::index::poly_reader::PolyReader;
use crate::index::postings::PostingWriter;
use crate::index::seg_reader::SegReader;
use crate::index::segment::Segment;
use crate::index::snapshot::Snapshot;
use crate::storage::Folder;

/// Drives every component writer for a new segment.
///
/// Documents get consecutive segment-local ids starting at 0. Deletions
/// against the segments of the reader it was created from are collected
/// alongside and land in the new segment's directory on [`SegWriter::finish`].
#[derive(Debug)]
pub struct SegWriter {
    folder: Arc<dyn Folder>,
    segment: Segment,
    writers: Vec<Box<dyn DataWriter>>,
    del_writer: DeletionsWriter,
}

impl SegWriter {
    pub fn new(folder: Arc<dyn Folder>, segment: Segment, reader: &PolyReader) -> Self {
        SegWriter {
            folder,
            segment,
            writers: vec![Box::new(DocWriter::new()), Box::new(PostingWriter::new())],
            del_writer: DeletionsWriter::new(reader),
        }
    }

    /// Clear out anything left in the segment directory and recreate it.
    pub fn prep_seg_dir(&self) -> Result<()> {
        let dir = self.segment.name();
        if self.folder.delete_tree(dir)? {
            debug!("Removed leftover segment directory {dir}");
        }
        self.folder.mkdir(dir)
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn del_writer(&self) -> &DeletionsWriter {
        &self.del_writer
    }

    pub fn del_writer_mut(&mut self) -> &mut DeletionsWriter {
        &mut self.del_writer
    }

    /// Add a document, returning its segment-local id.
    pub fn add_doc(&mut self, doc: &Document) -> Result<u32> {
        let doc_id = self.segment.count();
        for writer in &mut self.writers {
            writer.add_inverted_doc(doc, doc_id)?;
        }
        for field in doc.field_names() {
            self.segment.add_field(field);
        }
        self.segment.increment_count();
        Ok(doc_id)
    }

    /// Copy the live documents of a segment that stays in the index (or
    /// belongs to another index).
    pub fn add_segment(&mut self, reader: &SegReader, doc_map: &DocMap) -> Result<()> {
        for writer in &mut self.writers {
            writer.add_segment(reader, doc_map)?;
        }
        self.del_writer.add_segment(reader, doc_map)?;
        self.absorb(reader, doc_map);
        Ok(())
    }

    /// Copy the live documents of a segment and remove it from `snapshot`.
    pub fn merge_segment(
        &mut self,
        reader: &SegReader,
        doc_map: &DocMap,
        snapshot: &mut Snapshot,
    ) -> Result<()> {
        for writer in &mut self.writers {
            writer.merge_segment(reader, doc_map)?;
        }
        self.del_writer.merge_segment(reader, doc_map)?;
        snapshot.delete_entry(reader.seg_name());
        self.absorb(reader, doc_map);
        info!(
            "Merged {} ({} live docs) into {}",
            reader.seg_name(),
            doc_map.live_count(),
            self.segment.name()
        );
        Ok(())
    }

    /// Drop a segment without copying anything out of it.
    pub fn delete_segment(&mut self, reader: &SegReader, snapshot: &mut Snapshot) -> Result<()> {
        for writer in &mut self.writers {
            writer.delete_segment(reader)?;
        }
        self.del_writer.delete_segment(reader)?;
        snapshot.delete_entry(reader.seg_name());
        debug!(
            "Dropped {} with {} of {} docs deleted",
            reader.seg_name(),
            reader.del_count(),
            reader.doc_max()
        );
        Ok(())
    }

    fn absorb(&mut self, reader: &SegReader, doc_map: &DocMap) {
        for field in reader.segment().field_names() {
            self.segment.add_field(field);
        }
        let count = self.segment.count() + doc_map.live_count();
        self.segment.set_count(count);
    }

    /// Write out every component plus the segment metadata and enter the
    /// segment into `snapshot`.
    pub fn finish(&mut self, snapshot: &mut Snapshot) -> Result<()> {
        let folder = Arc::clone(&self.folder);
        for writer in &mut self.writers {
            writer.finish(folder.as_ref(), &mut self.segment)?;
        }
        self.del_writer.finish(folder.as_ref(), &mut self.segment)?;
        self.segment.write_file(folder.as_ref())?;
        snapshot.add_entry(self.segment.name());
        debug!(
            "Finished {} with {} docs",
            self.segment.name(),
            self.segment.count()
        );
        Ok(())
    }
}
