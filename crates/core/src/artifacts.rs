//! Key scheme and JSON payloads for intermediate pipeline outputs.
//!
//! ```text
//! {document_id}/metadata.json
//! {document_id}/pages/page_{page_number:04}.json
//! {document_id}/chunks/chunk_{chunk_index:06}.json
//! {document_id}/chunk-{chunk_index}.json   (embedding container)
//! ```

use crate::error::StorageError;
use crate::models::{Chunk, DocumentMetadata, EmbeddedChunk, ProcessedDocument};
use crate::traits::ObjectStore;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    Metadata,
    Page,
    Chunk,
    EmbeddedChunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub document_id: String,
    pub category: ArtifactCategory,
    pub sequence: u64,
}

impl ArtifactKey {
    pub fn metadata(document_id: &str) -> Self {
        Self::new(document_id, ArtifactCategory::Metadata, 0)
    }

    pub fn page(document_id: &str, page_number: u32) -> Self {
        Self::new(document_id, ArtifactCategory::Page, u64::from(page_number))
    }

    pub fn chunk(document_id: &str, chunk_index: u64) -> Self {
        Self::new(document_id, ArtifactCategory::Chunk, chunk_index)
    }

    pub fn embedded_chunk(document_id: &str, chunk_index: u64) -> Self {
        Self::new(document_id, ArtifactCategory::EmbeddedChunk, chunk_index)
    }

    fn new(document_id: &str, category: ArtifactCategory, sequence: u64) -> Self {
        Self {
            document_id: document_id.to_string(),
            category,
            sequence,
        }
    }

    pub fn blob_name(&self) -> String {
        let id = &self.document_id;
        match self.category {
            ArtifactCategory::Metadata => format!("{id}/metadata.json"),
            ArtifactCategory::Page => format!("{id}/pages/page_{:04}.json", self.sequence),
            ArtifactCategory::Chunk => format!("{id}/chunks/chunk_{:06}.json", self.sequence),
            ArtifactCategory::EmbeddedChunk => format!("{id}/chunk-{}.json", self.sequence),
        }
    }

    pub fn parse(blob_name: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| {
                Regex::new(
                    r"^(?P<id>[^/]+)/(?:(?P<meta>metadata\.json)|pages/page_(?P<page>\d{4,})\.json|chunks/chunk_(?P<chunk>\d{6,})\.json|chunk-(?P<embedded>\d+)\.json)$",
                )
                .ok()
            })
            .as_ref()?;

        let captures = pattern.captures(blob_name)?;
        let document_id = captures.name("id")?.as_str();
        if captures.name("meta").is_some() {
            return Some(Self::metadata(document_id));
        }

        let (category, digits) = if let Some(page) = captures.name("page") {
            (ArtifactCategory::Page, page)
        } else if let Some(chunk) = captures.name("chunk") {
            (ArtifactCategory::Chunk, chunk)
        } else {
            (ArtifactCategory::EmbeddedChunk, captures.name("embedded")?)
        };
        let sequence = digits.as_str().parse().ok()?;
        Some(Self::new(document_id, category, sequence))
    }
}

/// `metadata.json`: document metadata plus the chunk total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentManifest {
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageArtifact {
    pub page_number: u32,
    pub content: String,
    pub char_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobWriteReport {
    pub document_id: String,
    pub container: String,
    pub metadata: String,
    pub pages: Vec<String>,
    pub chunks: Vec<String>,
}

impl BlobWriteReport {
    pub fn total_blobs(&self) -> usize {
        1 + self.pages.len() + self.chunks.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactContainers {
    pub chunks: String,
    pub embeddings: String,
}

impl Default for ArtifactContainers {
    fn default() -> Self {
        Self {
            chunks: "chunks".to_string(),
            embeddings: "embeddings".to_string(),
        }
    }
}

/// Typed reads and writes of pipeline artifacts over an [`ObjectStore`].
/// Writes overwrite whatever sits at the same key.
pub struct ArtifactStore<S> {
    store: S,
    containers: ArtifactContainers,
    ensured: Mutex<BTreeSet<String>>,
}

impl<S: ObjectStore> ArtifactStore<S> {
    pub fn new(store: S, containers: ArtifactContainers) -> Self {
        Self {
            store,
            containers,
            ensured: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn containers(&self) -> &ArtifactContainers {
        &self.containers
    }

    pub fn object_store(&self) -> &S {
        &self.store
    }

    async fn ensure(&self, container: &str) -> Result<(), StorageError> {
        let mut ensured = self.ensured.lock().await;
        if ensured.contains(container) {
            return Ok(());
        }
        self.store.ensure_container(container).await?;
        ensured.insert(container.to_string());
        Ok(())
    }

    pub async fn put_json<T: Serialize + Sync>(
        &self,
        container: &str,
        key: &ArtifactKey,
        value: &T,
    ) -> Result<String, StorageError> {
        self.ensure(container).await?;
        let blob_name = key.blob_name();
        let body = serde_json::to_vec_pretty(value)?;
        self.store
            .put(container, &blob_name, body, JSON_CONTENT_TYPE)
            .await?;
        debug!(container, blob = %blob_name, "artifact written");
        Ok(blob_name)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        container: &str,
        key: &ArtifactKey,
    ) -> Result<T, StorageError> {
        let bytes = self.store.get(container, &key.blob_name()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Keys of one category under a document, sorted by numeric sequence.
    pub async fn list_keys(
        &self,
        container: &str,
        document_id: &str,
        category: ArtifactCategory,
    ) -> Result<Vec<ArtifactKey>, StorageError> {
        let prefix = format!("{document_id}/");
        let mut keys: Vec<ArtifactKey> = self
            .store
            .list(container, &prefix)
            .await?
            .iter()
            .filter_map(|name| ArtifactKey::parse(name))
            .filter(|key| key.document_id == document_id && key.category == category)
            .collect();
        keys.sort_by_key(|key| key.sequence);
        Ok(keys)
    }

    pub async fn write_processed_document(
        &self,
        document: &ProcessedDocument,
    ) -> Result<BlobWriteReport, StorageError> {
        let container = self.containers.chunks.as_str();
        let document_id = document.document_id();

        let manifest = DocumentManifest {
            metadata: document.metadata.clone(),
            total_chunks: document.total_chunks(),
        };
        let metadata = self
            .put_json(container, &ArtifactKey::metadata(document_id), &manifest)
            .await?;

        let mut pages = Vec::with_capacity(document.pages.len());
        let mut chunks = Vec::with_capacity(manifest.total_chunks);
        for document_page in &document.pages {
            let page = &document_page.page;
            let payload = PageArtifact {
                page_number: page.page_number,
                content: page.content.clone(),
                char_count: page.char_count(),
                chunk_count: document_page.chunks.len(),
            };
            pages.push(
                self.put_json(
                    container,
                    &ArtifactKey::page(document_id, page.page_number),
                    &payload,
                )
                .await?,
            );

            for chunk in &document_page.chunks {
                chunks.push(
                    self.put_json(
                        container,
                        &ArtifactKey::chunk(document_id, chunk.chunk_index),
                        chunk,
                    )
                    .await?,
                );
            }
        }

        info!(
            document_id,
            pages = pages.len(),
            chunks = chunks.len(),
            "document artifacts written"
        );

        Ok(BlobWriteReport {
            document_id: document_id.to_string(),
            container: container.to_string(),
            metadata,
            pages,
            chunks,
        })
    }

    pub async fn read_manifest(&self, document_id: &str) -> Result<DocumentManifest, StorageError> {
        self.get_json(&self.containers.chunks, &ArtifactKey::metadata(document_id))
            .await
    }

    pub async fn read_page(
        &self,
        document_id: &str,
        page_number: u32,
    ) -> Result<PageArtifact, StorageError> {
        self.get_json(
            &self.containers.chunks,
            &ArtifactKey::page(document_id, page_number),
        )
        .await
    }

    /// All chunk artifacts of a document in index order.
    pub async fn read_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StorageError> {
        let container = self.containers.chunks.as_str();
        let keys = self
            .list_keys(container, document_id, ArtifactCategory::Chunk)
            .await?;
        if keys.is_empty() {
            return Err(StorageError::NotFound {
                container: container.to_string(),
                key: format!("{document_id}/chunks/"),
            });
        }

        let mut chunks = Vec::with_capacity(keys.len());
        for key in &keys {
            chunks.push(self.get_json(container, key).await?);
        }
        Ok(chunks)
    }

    pub async fn write_embedded_chunks(
        &self,
        document_id: &str,
        embedded: &[EmbeddedChunk],
    ) -> Result<Vec<String>, StorageError> {
        let container = self.containers.embeddings.as_str();
        let mut blob_names = Vec::with_capacity(embedded.len());
        for item in embedded {
            let key = ArtifactKey::embedded_chunk(document_id, item.chunk.chunk_index);
            blob_names.push(self.put_json(container, &key, item).await?);
        }
        info!(document_id, count = blob_names.len(), "embedded chunks written");
        Ok(blob_names)
    }

    /// Embedded chunks of a document ordered by numeric chunk index.
    pub async fn read_embedded_chunks(
        &self,
        document_id: &str,
    ) -> Result<Vec<EmbeddedChunk>, StorageError> {
        let container = self.containers.embeddings.as_str();
        let keys = self
            .list_keys(container, document_id, ArtifactCategory::EmbeddedChunk)
            .await?;
        if keys.is_empty() {
            return Err(StorageError::NotFound {
                container: container.to_string(),
                key: format!("{document_id}/chunk-*.json"),
            });
        }

        let mut embedded = Vec::with_capacity(keys.len());
        for key in &keys {
            embedded.push(self.get_json(container, key).await?);
        }
        Ok(embedded)
    }
}
