use crate::error::StorageError;
use crate::models::{EmbeddedChunk, SearchRecord};
use crate::traits::SearchIndexService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 100;
pub const DEFAULT_INDEX_NAME: &str = "document-chunks";
pub const DEFAULT_VECTOR_DIMENSIONS: usize = 1_536;
pub const HNSW_ALGORITHM: &str = "hnsw-algorithm";
pub const VECTOR_PROFILE: &str = "vector-profile";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub facetable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search_profile: Option<String>,
}

impl IndexField {
    fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            key: false,
            searchable: false,
            filterable: false,
            sortable: false,
            facetable: false,
            dimensions: None,
            vector_search_profile: None,
        }
    }

    fn key(mut self) -> Self {
        self.key = true;
        self.filterable = true;
        self
    }

    fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    fn vector(mut self, dimensions: usize) -> Self {
        self.searchable = true;
        self.dimensions = Some(dimensions);
        self.vector_search_profile = Some(VECTOR_PROFILE.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorAlgorithm {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorProfile {
    pub name: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorSearch {
    #[serde(default)]
    pub algorithms: Vec<VectorAlgorithm>,
    #[serde(default)]
    pub profiles: Vec<VectorProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub name: String,
    pub fields: Vec<IndexField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<VectorSearch>,
}

impl IndexSchema {
    /// The fixed chunk index layout with an HNSW vector profile.
    pub fn document_chunks(name: &str, vector_dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            fields: vec![
                IndexField::new("id", "Edm.String").key(),
                IndexField::new("document_id", "Edm.String").filterable(),
                IndexField::new("create_date", "Edm.DateTimeOffset")
                    .filterable()
                    .sortable(),
                IndexField::new("page_number", "Edm.Int32")
                    .filterable()
                    .sortable(),
                IndexField::new("location", "Edm.String")
                    .searchable()
                    .filterable(),
                IndexField::new("year", "Edm.Int32").filterable().sortable(),
                IndexField::new("doc_type", "Edm.String")
                    .searchable()
                    .filterable(),
                IndexField::new("chunk_index", "Edm.Int32")
                    .filterable()
                    .sortable(),
                IndexField::new("content", "Edm.String").searchable(),
                IndexField::new("group_id", "Collection(Edm.String)")
                    .searchable()
                    .filterable(),
                IndexField::new("vector", "Collection(Edm.Single)").vector(vector_dimensions),
            ],
            vector_search: Some(VectorSearch {
                algorithms: vec![VectorAlgorithm {
                    name: HNSW_ALGORITHM.to_string(),
                    kind: "hnsw".to_string(),
                }],
                profiles: vec![VectorProfile {
                    name: VECTOR_PROFILE.to_string(),
                    algorithm: HNSW_ALGORITHM.to_string(),
                }],
            }),
        }
    }

    pub fn vector_dimensions(&self) -> Option<usize> {
        self.fields.iter().find_map(|field| field.dimensions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexingOutcome {
    pub key: String,
    pub succeeded: bool,
    pub error_message: Option<String>,
}

/// How the configured access groups map onto each record's `group_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupAssignment {
    /// Only the first configured group.
    #[default]
    FirstOnly,
    All,
}

impl GroupAssignment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first" | "first-only" | "first_only" => Some(Self::FirstOnly),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn apply(self, groups: &[String]) -> Vec<String> {
        match self {
            Self::FirstOnly => groups.iter().take(1).cloned().collect(),
            Self::All => groups.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEnsure {
    Existing,
    Created,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: Vec<(String, String)>,
}

impl UploadReport {
    pub fn total(&self) -> usize {
        self.uploaded + self.failed.len()
    }
}

pub fn search_record(
    chunk: &EmbeddedChunk,
    create_date: DateTime<Utc>,
    group_id: Vec<String>,
) -> SearchRecord {
    let metadata = &chunk.chunk.metadata;
    SearchRecord {
        id: chunk.chunk.chunk_id.clone(),
        document_id: metadata.document_id.clone(),
        create_date,
        page_number: chunk.chunk.page_number,
        location: metadata.location.clone(),
        year: metadata.year,
        doc_type: metadata.doc_type.as_ref().map(|doc_type| doc_type.to_string()),
        chunk_index: chunk.chunk.chunk_index,
        content: chunk.chunk.content.clone(),
        vector: chunk.embedding.clone(),
        group_id,
    }
}

pub struct SearchProjectionUploader<S> {
    service: S,
    batch_size: usize,
    assignment: GroupAssignment,
}

impl<S: SearchIndexService> SearchProjectionUploader<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            assignment: GroupAssignment::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_group_assignment(mut self, assignment: GroupAssignment) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Creates the index unless it already exists.
    pub async fn ensure_index(
        &self,
        name: &str,
        vector_dimensions: usize,
    ) -> Result<IndexEnsure, StorageError> {
        if self.service.get_index(name).await?.is_some() {
            debug!(index = name, "search index already exists");
            return Ok(IndexEnsure::Existing);
        }

        self.service
            .create_index(&IndexSchema::document_chunks(name, vector_dimensions))
            .await?;
        info!(index = name, vector_dimensions, "search index created");
        Ok(IndexEnsure::Created)
    }

    /// Uploads in batches. Rejected records are logged and reported; they
    /// never stop later batches.
    pub async fn upload(
        &self,
        index: &str,
        chunks: &[EmbeddedChunk],
        access_groups: &[String],
    ) -> Result<UploadReport, StorageError> {
        let create_date = Utc::now();
        let group_id = self.assignment.apply(access_groups);
        let mut report = UploadReport::default();

        for (batch_number, batch) in chunks.chunks(self.batch_size).enumerate() {
            let records: Vec<SearchRecord> = batch
                .iter()
                .map(|chunk| search_record(chunk, create_date, group_id.clone()))
                .collect();

            let outcomes = self.service.upload_documents(index, &records).await?;
            for outcome in outcomes {
                if outcome.succeeded {
                    report.uploaded += 1;
                } else {
                    let message = outcome
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string());
                    error!(index, key = %outcome.key, error = %message, "search record rejected");
                    report.failed.push((outcome.key, message));
                }
            }
            debug!(index, batch = batch_number, size = records.len(), "search batch uploaded");
        }

        info!(
            index,
            uploaded = report.uploaded,
            failed = report.failed.len(),
            "search upload complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, DocType};
    use crate::stores::MemorySearchService;

    fn chunks(count: u64) -> Vec<EmbeddedChunk> {
        (0..count)
            .map(|index| EmbeddedChunk {
                chunk: Chunk {
                    chunk_id: Chunk::make_id("doc-1", index),
                    chunk_index: index,
                    page_number: 1,
                    content: format!("content {index}"),
                    metadata: ChunkMetadata {
                        document_id: "doc-1".to_string(),
                        location: Some("Montana".to_string()),
                        year: Some(2025),
                        doc_type: Some(DocType::Request),
                        chunk_index: index,
                        ..Default::default()
                    },
                },
                embedding: vec![0.25; 4],
            })
            .collect()
    }

    fn groups() -> Vec<String> {
        vec!["group-A".to_string(), "group-B".to_string()]
    }

    #[test]
    fn schema_serializes_in_service_format() -> Result<(), serde_json::Error> {
        let schema = IndexSchema::document_chunks("document-chunks", 1536);
        let value = serde_json::to_value(&schema)?;

        assert_eq!(value["fields"][0]["name"], "id");
        assert_eq!(value["fields"][0]["key"], true);
        let vector = &value["fields"][10];
        assert_eq!(vector["type"], "Collection(Edm.Single)");
        assert_eq!(vector["dimensions"], 1536);
        assert_eq!(vector["vectorSearchProfile"], VECTOR_PROFILE);
        assert_eq!(value["vectorSearch"]["profiles"][0]["algorithm"], HNSW_ALGORITHM);
        assert!(value["fields"][1].get("dimensions").is_none());
        Ok(())
    }

    #[test]
    fn metadata_fields_support_filtering_and_sorting() {
        let schema = IndexSchema::document_chunks("document-chunks", 8);
        let field = |name: &str| {
            schema
                .fields
                .iter()
                .find(|field| field.name == name)
                .cloned()
                .unwrap_or_else(|| panic!("field {name} missing"))
        };

        for name in ["location", "doc_type", "group_id"] {
            let field = field(name);
            assert!(field.searchable && field.filterable, "{name}");
        }
        let year = field("year");
        assert!(year.filterable && year.sortable);
        assert!(!field("content").filterable);
    }

    #[test]
    fn group_assignment_narrows_to_first_by_default() {
        assert_eq!(GroupAssignment::default().apply(&groups()), vec!["group-A"]);
        assert_eq!(GroupAssignment::All.apply(&groups()), groups());
        assert!(GroupAssignment::FirstOnly.apply(&[]).is_empty());
        assert_eq!(GroupAssignment::parse("ALL"), Some(GroupAssignment::All));
        assert_eq!(GroupAssignment::parse("some"), None);
    }

    #[tokio::test]
    async fn ensure_index_creates_once() -> Result<(), Box<dyn std::error::Error>> {
        let uploader = SearchProjectionUploader::new(MemorySearchService::default());

        assert_eq!(uploader.ensure_index("chunks", 4).await?, IndexEnsure::Created);
        assert_eq!(uploader.ensure_index("chunks", 4).await?, IndexEnsure::Existing);
        let schema = uploader.service().get_index("chunks").await?;
        assert_eq!(schema.and_then(|schema| schema.vector_dimensions()), Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn every_record_gets_only_the_first_group() -> Result<(), Box<dyn std::error::Error>> {
        let uploader = SearchProjectionUploader::new(MemorySearchService::default());
        uploader.ensure_index("chunks", 4).await?;

        let report = uploader.upload("chunks", &chunks(3), &groups()).await?;

        assert_eq!(report.uploaded, 3);
        let records = uploader.service().documents("chunks").await;
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.group_id, vec!["group-A".to_string()]);
            assert_eq!(record.year, Some(2025));
        }
        assert!(records.windows(2).all(|pair| pair[0].create_date == pair[1].create_date));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_records_do_not_stop_later_batches() -> Result<(), Box<dyn std::error::Error>> {
        let service = MemorySearchService::default().with_rejected_key("doc-1_1");
        let uploader = SearchProjectionUploader::new(service).with_batch_size(2);
        uploader.ensure_index("chunks", 4).await?;

        let report = uploader.upload("chunks", &chunks(5), &groups()).await?;

        assert_eq!(report.uploaded, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "doc-1_1");
        assert_eq!(report.total(), 5);
        assert_eq!(uploader.service().upload_calls().await, 3);
        Ok(())
    }
}
