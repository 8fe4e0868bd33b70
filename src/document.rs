//! Stored documents.
//!
//! A [`Document`] is an ordered map of field names to text values. Every
//! field is stored verbatim and indexed by the terms [`crate::analysis`]
//! extracts from it.
//!
//! # Examples
//!
//! ```
//! use glaive::document::Document;
//!
//! let doc = Document::builder()
//!     .add_text("title", "Rust Programming")
//!     .add_text("body", "Ownership and borrowing")
//!     .build();
//!
//! assert_eq!(doc.get("title"), Some("Rust Programming"));
//! assert_eq!(doc.len(), 2);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A document represents a single item to be indexed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Document {
    /// The field values for this document
    fields: BTreeMap<String, String>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Document {
            fields: BTreeMap::new(),
        }
    }

    /// Add a field value to the document, replacing any previous value.
    pub fn add_field<S: Into<String>, T: Into<String>>(&mut self, name: S, value: T) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field value from the document.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Check if the document has a field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Get all field names, in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterate over `(field, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Create a builder for constructing documents.
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::new()
    }
}

/// A builder for constructing documents in a fluent manner.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    /// Create a new document builder.
    pub fn new() -> Self {
        DocumentBuilder {
            document: Document::new(),
        }
    }

    /// Add a text field to the document.
    pub fn add_text<S: Into<String>, T: Into<String>>(mut self, name: S, value: T) -> Self {
        self.document.add_field(name, value);
        self
    }

    /// Build the document.
    pub fn build(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_accessors() {
        let doc = Document::builder()
            .add_text("b", "second")
            .add_text("a", "first")
            .build();

        assert_eq!(doc.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some("first"));
        assert!(doc.get("c").is_none());
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_serialization_is_plain_object() {
        let doc = Document::builder().add_text("content", "foo").build();
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"fields":{"content":"foo"}}"#);
    }
}
