use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, skip_serializing_none, DisplayFromStr, PickFirst};
use std::collections::BTreeMap;
use std::fmt;

/// Caller-supplied document tag. `request` and `response` select graph schemas;
/// anything else is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocType {
    Request,
    Response,
    Other(String),
}

impl DocType {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("request") {
            Self::Request
        } else if trimmed.eq_ignore_ascii_case("response") {
            Self::Response
        } else {
            Self::Other(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for DocType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DocType> for String {
    fn from(value: DocType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub document_name: String,
    pub file_extension: String,
    pub location: String,
    pub year: i32,
    pub doc_type: DocType,
    pub checksum: String,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub page_number: u32,
    pub content: String,
}

impl Page {
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Provenance attached to every chunk. Known fields are typed; anything a
/// different writer adds survives a round trip through `extra`.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMetadata {
    pub document_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub year: Option<i32>,
    #[serde(default)]
    pub doc_type: Option<DocType>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub char_count: usize,
    #[serde(default)]
    pub chunk_method: Option<String>,
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub chunk_index: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub chunk_index: u64,
    pub page_number: u32,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn make_id(document_id: &str, chunk_index: u64) -> String {
        format!("{document_id}_{chunk_index}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn doc_type(&self) -> Option<&DocType> {
        self.chunk.metadata.doc_type.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage {
    pub page: Page,
    pub chunks: Vec<Chunk>,
}

/// Output of extraction + chunking for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDocument {
    pub metadata: DocumentMetadata,
    pub pages: Vec<DocumentPage>,
}

impl ProcessedDocument {
    pub fn document_id(&self) -> &str {
        &self.metadata.document_id
    }

    pub fn total_chunks(&self) -> usize {
        self.pages.iter().map(|page| page.chunks.len()).sum()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.pages.iter().flat_map(|page| page.chunks.iter())
    }
}

/// One flat row in the vector search index.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRecord {
    pub id: String,
    pub document_id: String,
    pub create_date: DateTime<Utc>,
    pub page_number: u32,
    pub location: Option<String>,
    pub year: Option<i32>,
    pub doc_type: Option<String>,
    pub chunk_index: u64,
    pub content: String,
    pub vector: Vec<f32>,
    pub group_id: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn doc_type_parses_case_insensitively_and_keeps_other_tags() {
        assert_eq!(DocType::parse("Request"), DocType::Request);
        assert_eq!(DocType::parse(" RESPONSE "), DocType::Response);
        assert_eq!(
            DocType::parse("verida-response"),
            DocType::Other("verida-response".to_string())
        );
        assert_eq!(DocType::Other("general".to_string()).to_string(), "general");
    }

    #[test]
    fn chunk_metadata_accepts_string_indices_and_keeps_unknown_fields() {
        let raw = json!({
            "document_id": "doc-1",
            "location": "Montana",
            "year": "2025",
            "doc_type": "request",
            "chunk_index": "7",
            "producer": "macOS Version 26.1",
            "page_label": "iv"
        });

        let metadata: ChunkMetadata = serde_json::from_value(raw).expect("metadata parses");

        assert_eq!(metadata.year, Some(2025));
        assert_eq!(metadata.chunk_index, 7);
        assert_eq!(metadata.doc_type, Some(DocType::Request));
        assert_eq!(metadata.extra.get("producer"), Some(&json!("macOS Version 26.1")));

        let written = serde_json::to_value(&metadata).expect("metadata serializes");
        assert_eq!(written["page_label"], json!("iv"));
        assert_eq!(written["chunk_index"], json!(7));
        assert!(written.get("document_name").is_none());
    }

    #[test]
    fn embedded_chunk_is_chunk_fields_plus_embedding() {
        let embedded = EmbeddedChunk {
            chunk: Chunk {
                chunk_id: Chunk::make_id("doc-1", 0),
                chunk_index: 0,
                page_number: 3,
                content: "scope of work".to_string(),
                metadata: ChunkMetadata {
                    document_id: "doc-1".to_string(),
                    ..Default::default()
                },
            },
            embedding: vec![0.5, -0.5],
        };

        let value = serde_json::to_value(&embedded).expect("serializes");
        assert_eq!(value["chunk_id"], json!("doc-1_0"));
        assert_eq!(value["page_number"], json!(3));
        assert_eq!(value["embedding"], json!([0.5, -0.5]));
    }
}
