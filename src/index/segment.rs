//! Segment metadata.
//!
//! A segment is an immutable directory of index data named after its
//! number (`segment_<base36>`). Its `segmeta.json` records the document
//! count, the field names and one metadata block per component writer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GlaiveError, Result};
use crate::index::file_names;
use crate::storage::{Folder, join_path, write_file_atomic};

/// Name of the metadata file inside a segment directory.
pub const SEGMETA_FILE: &str = "segmeta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegMeta {
    name: String,
    count: u32,
    field_names: Vec<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentFile {
    segmeta: SegMeta,
    #[serde(flatten)]
    components: BTreeMap<String, Value>,
}

/// Segment metadata and management.
#[derive(Debug, Clone)]
pub struct Segment {
    number: u64,
    name: String,
    count: u32,
    field_names: Vec<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    metadata: BTreeMap<String, Value>,
}

impl Segment {
    /// Create a new, empty segment.
    pub fn new(number: u64) -> Self {
        Segment {
            number,
            name: file_names::segment_name(number),
            count: 0,
            field_names: Vec::new(),
            created_at: chrono::Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Segment number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Directory name of the segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of documents written to the segment, deleted or not.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Set the document count.
    pub fn set_count(&mut self, count: u32) {
        self.count = count;
    }

    /// Add one to the document count, returning the previous value.
    pub fn increment_count(&mut self) -> u32 {
        let previous = self.count;
        self.count += 1;
        previous
    }

    /// Register a field name. Returns its position.
    pub fn add_field(&mut self, field: &str) -> usize {
        match self.field_names.iter().position(|f| f == field) {
            Some(pos) => pos,
            None => {
                self.field_names.push(field.to_string());
                self.field_names.len() - 1
            }
        }
    }

    /// Registered field names, in registration order.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Creation time of the segment.
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    /// Store a component's metadata block.
    pub fn store_metadata(&mut self, key: &str, value: Value) -> Result<()> {
        if key == "segmeta" {
            return Err(GlaiveError::invalid_operation(
                "metadata key 'segmeta' is reserved",
            ));
        }
        self.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Fetch a component's metadata block.
    pub fn fetch_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Path of a file inside the segment directory.
    pub fn file_path(&self, file: &str) -> String {
        join_path(&self.name, file)
    }

    /// Write `segmeta.json` into the segment directory.
    pub fn write_file(&self, folder: &dyn Folder) -> Result<()> {
        let file = SegmentFile {
            segmeta: SegMeta {
                name: self.name.clone(),
                count: self.count,
                field_names: self.field_names.clone(),
                created_at: self.created_at,
            },
            components: self.metadata.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_file_atomic(folder, &self.file_path(SEGMETA_FILE), &bytes)
    }

    /// Read a segment's metadata from its directory.
    pub fn read_file(folder: &dyn Folder, name: &str) -> Result<Self> {
        let number = file_names::segment_number(name)
            .ok_or_else(|| GlaiveError::index(format!("'{name}' is not a segment name")))?;
        let path = join_path(name, SEGMETA_FILE);
        let bytes = folder.slurp_file(&path)?;
        let file: SegmentFile = serde_json::from_slice(&bytes)
            .map_err(|e| GlaiveError::index(format!("Failed to parse {path}: {e}")))?;
        if file.segmeta.name != name {
            return Err(GlaiveError::index(format!(
                "{path} describes segment '{}'",
                file.segmeta.name
            )));
        }

        Ok(Segment {
            number,
            name: name.to_string(),
            count: file.segmeta.count,
            field_names: file.segmeta.field_names,
            created_at: file.segmeta.created_at,
            metadata: file.components,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RamFolder, RamFolderConfig};

    #[test]
    fn test_segment_round_trip() {
        let folder = RamFolder::new(RamFolderConfig::default());
        let mut segment = Segment::new(37);
        assert_eq!(segment.name(), "segment_11");

        assert_eq!(segment.increment_count(), 0);
        assert_eq!(segment.increment_count(), 1);
        assert_eq!(segment.add_field("title"), 0);
        assert_eq!(segment.add_field("body"), 1);
        assert_eq!(segment.add_field("title"), 0);
        segment
            .store_metadata("documents", serde_json::json!({"format": 1}))
            .unwrap();
        segment.write_file(&folder).unwrap();

        let read = Segment::read_file(&folder, "segment_11").unwrap();
        assert_eq!(read.number(), 37);
        assert_eq!(read.count(), 2);
        assert_eq!(read.field_names(), ["title", "body"]);
        assert_eq!(
            read.fetch_metadata("documents"),
            Some(&serde_json::json!({"format": 1}))
        );
    }

    #[test]
    fn test_reserved_metadata_key() {
        let mut segment = Segment::new(1);
        assert!(segment.store_metadata("segmeta", Value::Null).is_err());
    }

    #[test]
    fn test_read_rejects_non_segment() {
        let folder = RamFolder::new(RamFolderConfig::default());
        assert!(Segment::read_file(&folder, "snapshot_1.json").is_err());
        assert!(Segment::read_file(&folder, "segment_1").is_err());
    }
}
