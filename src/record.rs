//! Standard record (SEP) documents
//!
//! A standard record is a small JSON document stored in the backend that
//! points at the real content and carries metadata about it:
//!
//! ```json
//! {
//!   "s": {"cid": "bafy...", "path": "images/cover.png", "type": "image"},
//!   "d": {"title": "Cover", "description": "Front cover"},
//!   "t": {"size": 18231, "width": 640, "height": 480, "length": 0},
//!   "x": {"attachments": [], "custom_fields": {"license": "CC-BY"}}
//! }
//! ```
//!
//! Only `s.cid` is required. Every other field defaults to an empty string,
//! zero, or an empty collection.

use crate::error::{GatewayError, Result};
use crate::models::Identifier;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// Where the described content lives and what kind of content it is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structural {
    #[serde(rename = "cid")]
    pub address: Identifier,
    #[serde(rename = "path", default, deserialize_with = "null_as_default")]
    pub relative_path: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub record_type: String,
}

/// Free-form human metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Descriptive {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
}

/// Numeric attributes; zero when not applicable or not provided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Technical {
    #[serde(deserialize_with = "null_as_default")]
    pub size: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub width: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub height: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub length: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    #[serde(rename = "cid", deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub attachment_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extra {
    #[serde(deserialize_with = "null_items_as_default")]
    pub attachments: Vec<Attachment>,
    #[serde(deserialize_with = "null_as_default")]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
}

/// A parsed standard record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardRecord {
    #[serde(rename = "s")]
    pub structural: Structural,
    #[serde(rename = "d", default, deserialize_with = "null_as_default")]
    pub descriptive: Descriptive,
    #[serde(rename = "t", default, deserialize_with = "null_as_default")]
    pub technical: Technical,
    #[serde(rename = "x", default, deserialize_with = "null_as_default")]
    pub extra: Extra,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A list where both the list and its entries may be `null`
fn null_items_as_default<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let items = Option::<Vec<Option<T>>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items.into_iter().map(Option::unwrap_or_default).collect())
}

impl StandardRecord {
    /// Parse a record from raw backend bytes
    ///
    /// # Returns
    /// * `Ok(StandardRecord)` if the bytes are a JSON object with a valid
    ///   structural section
    /// * `Err(GatewayError::ParseFailure)` otherwise
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| GatewayError::ParseFailure(e.to_string()))
    }

    /// Final segment of the structural path, used as the serving name
    pub fn default_display_name(&self) -> &str {
        last_segment(&self.structural.relative_path)
    }
}

/// Last `/`-separated segment of a path (empty for a trailing slash)
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Outcome of trying to read an identifier as a standard record
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorLookup {
    /// The identifier names a plain file (or nothing readable as a record)
    DirectFile,
    /// The identifier names a standard record
    Descriptor(Arc<StandardRecord>),
}

impl DescriptorLookup {
    /// Interpret raw bytes, treating any parse failure as a plain file
    pub fn interpret(bytes: &[u8]) -> Self {
        match StandardRecord::from_slice(bytes) {
            Ok(record) => DescriptorLookup::Descriptor(Arc::new(record)),
            Err(_) => DescriptorLookup::DirectFile,
        }
    }

    pub fn record(&self) -> Option<&Arc<StandardRecord>> {
        match self {
            DescriptorLookup::Descriptor(record) => Some(record),
            DescriptorLookup::DirectFile => None,
        }
    }
}

/// Body of a metadata response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(rename = "type")]
    pub record_type: String,
    pub descriptive: Descriptive,
    pub technical: Technical,
    pub extra: Extra,
}

impl From<&StandardRecord> for MetadataDocument {
    fn from(record: &StandardRecord) -> Self {
        MetadataDocument {
            record_type: record.structural.record_type.clone(),
            descriptive: record.descriptive.clone(),
            technical: record.technical,
            extra: record.extra.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_record() {
        let doc = json!({
            "s": {"cid": "abc123", "path": "img/cover.png", "type": "image"},
            "d": {"title": "Cover", "description": "Front"},
            "t": {"size": 10, "width": 640, "height": 480, "length": 0},
            "x": {
                "attachments": [{"cid": "att1", "type": "text", "title": "Notes", "description": ""}],
                "custom_fields": {"license": "CC-BY", "rating": 4.5, "tags": ["a", "b"]}
            }
        });
        let record = StandardRecord::from_slice(doc.to_string().as_bytes()).unwrap();

        assert_eq!(record.structural.address.as_str(), "abc123");
        assert_eq!(record.structural.relative_path, "img/cover.png");
        assert_eq!(record.default_display_name(), "cover.png");
        assert_eq!(record.technical.width, 640);
        assert_eq!(record.extra.attachments[0].address, "att1");
        assert_eq!(record.extra.custom_fields["rating"], json!(4.5));
    }

    #[test]
    fn test_parse_minimal_record_defaults() {
        let record =
            StandardRecord::from_slice(br#"{"s":{"cid":"abc123"},"d":null}"#).unwrap();
        assert_eq!(record.structural.relative_path, "");
        assert_eq!(record.descriptive, Descriptive::default());
        assert_eq!(record.technical, Technical::default());
        assert!(record.extra.attachments.is_empty());
        assert!(record.extra.custom_fields.is_empty());
    }

    #[test]
    fn test_null_technical_fields_and_attachments() {
        let record = StandardRecord::from_slice(
            br#"{"s":{"cid":"abc123","type":"image"},
                "t":{"size":null,"width":640,"height":null},
                "x":{"attachments":[null,{"cid":"att1","title":null}],"custom_fields":null}}"#,
        )
        .unwrap();

        assert_eq!(record.technical.size, 0);
        assert_eq!(record.technical.width, 640);
        assert_eq!(record.technical.height, 0);
        assert_eq!(record.technical.length, 0);
        assert_eq!(record.extra.attachments.len(), 2);
        assert_eq!(record.extra.attachments[0], Attachment::default());
        assert_eq!(record.extra.attachments[1].address, "att1");
        assert_eq!(record.extra.attachments[1].title, "");

        let record = StandardRecord::from_slice(br#"{"s":{"cid":"abc123"},"x":{"attachments":null}}"#)
            .unwrap();
        assert!(record.extra.attachments.is_empty());
    }

    #[test]
    fn test_missing_structural_is_parse_failure() {
        assert!(StandardRecord::from_slice(b"{}").is_err());
        assert!(StandardRecord::from_slice(br#"{"s":{"path":"a"}}"#).is_err());
        assert!(StandardRecord::from_slice(br#"{"s":{"cid":"not a cid"}}"#).is_err());
        assert!(StandardRecord::from_slice(b"\xff\xd8\xff\xe0").is_err());
    }

    #[test]
    fn test_interpret() {
        assert_eq!(DescriptorLookup::interpret(b"plain text"), DescriptorLookup::DirectFile);
        let lookup = DescriptorLookup::interpret(br#"{"s":{"cid":"abc123"}}"#);
        assert!(lookup.record().is_some());
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("a/b/c.txt"), "c.txt");
        assert_eq!(last_segment("c.txt"), "c.txt");
        assert_eq!(last_segment(""), "");
        assert_eq!(last_segment("dir/"), "");
    }

    #[test]
    fn test_metadata_document_shape() {
        let record = StandardRecord::from_slice(
            br#"{"s":{"cid":"abc123","path":"","type":"image"},"d":{"title":"t"},"t":{},"x":{}}"#,
        )
        .unwrap();
        let value = serde_json::to_value(MetadataDocument::from(&record)).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["descriptive"]["title"], "t");
        assert_eq!(value["technical"]["size"], 0);
        assert_eq!(value["extra"]["attachments"], json!([]));
    }
}
