use crate::artifacts::{ArtifactStore, BlobWriteReport};
use crate::chunking::{build_document_pages, ChunkingProfiles};
use crate::config::PipelineDefaults;
use crate::embeddings::EmbeddingClient;
use crate::error::{IngestError, PipelineError};
use crate::extractor::{extract_document, file_extension, FileKind};
use crate::models::{DocType, DocumentMetadata, EmbeddedChunk, ProcessedDocument};
use crate::traits::{EmbeddingBackend, ObjectStore, Sleeper};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use uuid::Uuid;

/// One document submitted for processing.
#[derive(Debug, Clone, Default)]
pub struct DocumentRequest {
    /// Display name; the file stem is used when empty.
    pub document_name: String,
    /// Original file name, used for the extension.
    pub file_name: String,
    pub content: Vec<u8>,
    pub location: Option<String>,
    pub year: Option<i32>,
    pub doc_type: Option<String>,
}

impl DocumentRequest {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::InvalidArgument(format!("bad file name: {}", path.display())))?
            .to_string();
        Ok(Self {
            file_name,
            content,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ExtractMetadata,
    RouteProcessor,
    SaveTempInput,
    ProcessDocument,
    WriteArtifacts,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExtractMetadata => "extract_metadata",
            Self::RouteProcessor => "route_processor",
            Self::SaveTempInput => "save_temp_input",
            Self::ProcessDocument => "process_document",
            Self::WriteArtifacts => "write_artifacts",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub document_id: Option<String>,
    pub error: PipelineError,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub document: ProcessedDocument,
    pub written: BlobWriteReport,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PipelineOutput),
    Failed(PipelineFailure),
}

impl PipelineOutcome {
    pub fn into_result(self) -> Result<PipelineOutput, PipelineFailure> {
        match self {
            Self::Completed(output) => Ok(output),
            Self::Failed(failure) => Err(failure),
        }
    }
}

struct Staged {
    metadata: DocumentMetadata,
    content: Vec<u8>,
}

struct Routed {
    staged: Staged,
    kind: FileKind,
}

struct Saved {
    metadata: DocumentMetadata,
    kind: FileKind,
    input: NamedTempFile,
}

/// Each variant owns exactly what its stage needs. Failures jump straight
/// to `Failed`.
enum PipelineState {
    ExtractMetadata(DocumentRequest),
    RouteProcessor(Staged),
    SaveTempInput(Routed),
    ProcessDocument(Saved),
    WriteArtifacts(ProcessedDocument),
    Completed(PipelineOutput),
    Failed(PipelineFailure),
}

impl PipelineState {
    fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::ExtractMetadata(_) => Some(PipelineStage::ExtractMetadata),
            Self::RouteProcessor(_) => Some(PipelineStage::RouteProcessor),
            Self::SaveTempInput(_) => Some(PipelineStage::SaveTempInput),
            Self::ProcessDocument(_) => Some(PipelineStage::ProcessDocument),
            Self::WriteArtifacts(_) => Some(PipelineStage::WriteArtifacts),
            Self::Completed(_) | Self::Failed(_) => None,
        }
    }
}

fn failed(stage: PipelineStage, document_id: &str, error: impl Into<PipelineError>) -> PipelineState {
    PipelineState::Failed(PipelineFailure {
        stage,
        document_id: Some(document_id.to_string()),
        error: error.into(),
    })
}

/// Extract → route → stage to a temp file → extract and chunk → write
/// artifacts.
pub struct DocumentPipeline<'a, S> {
    artifacts: &'a ArtifactStore<S>,
    profiles: ChunkingProfiles,
    defaults: PipelineDefaults,
    temp_dir: Option<PathBuf>,
}

impl<'a, S: ObjectStore> DocumentPipeline<'a, S> {
    pub fn new(artifacts: &'a ArtifactStore<S>) -> Self {
        Self {
            artifacts,
            profiles: ChunkingProfiles::default(),
            defaults: PipelineDefaults::default(),
            temp_dir: None,
        }
    }

    pub fn with_profiles(mut self, profiles: ChunkingProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_defaults(mut self, defaults: PipelineDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Directory for staged input files; the system temp dir otherwise.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub async fn run(&self, request: DocumentRequest) -> PipelineOutcome {
        let mut state = PipelineState::ExtractMetadata(request);
        loop {
            let from = state.stage();
            state = match state {
                PipelineState::ExtractMetadata(request) => self.extract_metadata(request),
                PipelineState::RouteProcessor(staged) => Self::route_processor(staged),
                PipelineState::SaveTempInput(routed) => self.save_temp_input(routed),
                PipelineState::ProcessDocument(saved) => self.process_document(saved),
                PipelineState::WriteArtifacts(document) => self.write_artifacts(document).await,
                PipelineState::Completed(output) => {
                    info!(
                        document_id = output.document.document_id(),
                        pages = output.document.pages.len(),
                        chunks = output.document.total_chunks(),
                        "pipeline completed"
                    );
                    return PipelineOutcome::Completed(output);
                }
                PipelineState::Failed(failure) => {
                    error!(
                        stage = %failure.stage,
                        document_id = failure.document_id.as_deref().unwrap_or("-"),
                        error = %failure.error,
                        "pipeline failed"
                    );
                    return PipelineOutcome::Failed(failure);
                }
            };
            if let Some(from) = from {
                debug!(from = %from, to = ?state.stage(), "pipeline transition");
            }
        }
    }

    fn extract_metadata(&self, request: DocumentRequest) -> PipelineState {
        if request.content.is_empty() {
            return PipelineState::Failed(PipelineFailure {
                stage: PipelineStage::ExtractMetadata,
                document_id: None,
                error: IngestError::InvalidArgument(format!("{} is empty", request.file_name)).into(),
            });
        }

        let document_name = if request.document_name.trim().is_empty() {
            Path::new(&request.file_name)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&request.file_name)
                .to_string()
        } else {
            request.document_name.trim().to_string()
        };

        let checksum = format!("{:x}", Sha256::digest(&request.content));
        let metadata = DocumentMetadata {
            document_id: Uuid::new_v4().to_string(),
            document_name,
            file_extension: file_extension(&request.file_name),
            location: request
                .location
                .filter(|location| !location.trim().is_empty())
                .unwrap_or_else(|| self.defaults.location.clone()),
            year: request.year.unwrap_or(self.defaults.year),
            doc_type: DocType::parse(
                request
                    .doc_type
                    .as_deref()
                    .filter(|doc_type| !doc_type.trim().is_empty())
                    .unwrap_or(&self.defaults.doc_type),
            ),
            checksum,
            total_pages: 0,
        };

        PipelineState::RouteProcessor(Staged {
            metadata,
            content: request.content,
        })
    }

    fn route_processor(staged: Staged) -> PipelineState {
        match FileKind::from_extension(&staged.metadata.file_extension) {
            Ok(kind) => PipelineState::SaveTempInput(Routed { staged, kind }),
            Err(error) => failed(
                PipelineStage::RouteProcessor,
                &staged.metadata.document_id,
                error,
            ),
        }
    }

    fn save_temp_input(&self, routed: Routed) -> PipelineState {
        let Routed { staged, kind } = routed;
        let document_id = staged.metadata.document_id.clone();
        match self.stage_input(&staged.metadata.file_extension, &staged.content) {
            Ok(input) => PipelineState::ProcessDocument(Saved {
                metadata: staged.metadata,
                kind,
                input,
            }),
            Err(error) => failed(PipelineStage::SaveTempInput, &document_id, error),
        }
    }

    fn stage_input(&self, extension: &str, content: &[u8]) -> Result<NamedTempFile, IngestError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rfp-input-").suffix(extension);
        let mut input = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        input.write_all(content)?;
        input.flush()?;
        Ok(input)
    }

    /// The staged file is dropped, and so deleted, when this returns.
    fn process_document(&self, saved: Saved) -> PipelineState {
        let Saved {
            mut metadata,
            kind,
            input,
        } = saved;

        let extracted = match extract_document(input.path(), kind) {
            Ok(extracted) => extracted,
            Err(error) => {
                return failed(PipelineStage::ProcessDocument, &metadata.document_id, error)
            }
        };
        drop(input);

        metadata.total_pages = extracted.total_pages;
        let config = self.profiles.for_kind(kind);
        let pages = build_document_pages(&metadata, extracted.pages, kind, config);
        info!(
            document_id = %metadata.document_id,
            kind = kind.as_str(),
            total_pages = metadata.total_pages,
            retained_pages = pages.len(),
            "document processed"
        );

        PipelineState::WriteArtifacts(ProcessedDocument { metadata, pages })
    }

    async fn write_artifacts(&self, document: ProcessedDocument) -> PipelineState {
        match self.artifacts.write_processed_document(&document).await {
            Ok(written) => PipelineState::Completed(PipelineOutput { document, written }),
            Err(error) => failed(PipelineStage::WriteArtifacts, document.document_id(), error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedReport {
    pub document_id: String,
    pub total_chunks: usize,
    pub dimensions: usize,
    pub blob_names: Vec<String>,
}

/// Embeds every chunk artifact of a document and writes the embedded
/// copies. Nothing is written unless every chunk got a vector.
pub async fn embed_document<S, B, Z>(
    artifacts: &ArtifactStore<S>,
    client: &EmbeddingClient<B, Z>,
    document_id: &str,
) -> Result<EmbedReport, PipelineError>
where
    S: ObjectStore,
    B: EmbeddingBackend,
    Z: Sleeper,
{
    let chunks = artifacts.read_chunks(document_id).await?;
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
    info!(document_id, chunks = chunks.len(), model = client.model(), "embedding document");

    let vectors = client.embed(&texts).await?;
    let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
    let embedded: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
        .collect();

    let blob_names = artifacts.write_embedded_chunks(document_id, &embedded).await?;
    Ok(EmbedReport {
        document_id: document_id.to_string(),
        total_chunks: embedded.len(),
        dimensions,
        blob_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactContainers;
    use crate::embeddings::HashingEmbeddings;
    use crate::extractor::fixtures::{docx_with_body, page_break, paragraph, pdf_with_pages};
    use crate::stores::MemoryObjectStore;

    fn artifacts() -> ArtifactStore<MemoryObjectStore> {
        ArtifactStore::new(MemoryObjectStore::default(), ArtifactContainers::default())
    }

    fn sentence(seed: &str, length: usize) -> String {
        let mut text = String::new();
        let mut counter = 0;
        while text.chars().count() < length {
            text.push_str(&format!("{seed}{counter} "));
            counter += 1;
        }
        text.chars().take(length).collect::<String>().trim_end().to_string()
    }

    fn temp_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn unsupported_extension_fails_at_routing_and_writes_nothing(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempfile::tempdir()?;
        let store = artifacts();
        let pipeline = DocumentPipeline::new(&store).with_temp_dir(temp.path());

        let outcome = pipeline
            .run(DocumentRequest {
                document_name: "prices".to_string(),
                file_name: "prices.csv".to_string(),
                content: b"a,b,c".to_vec(),
                ..Default::default()
            })
            .await;

        let failure = outcome.into_result().expect_err("csv is unsupported");
        assert_eq!(failure.stage, PipelineStage::RouteProcessor);
        assert!(matches!(
            failure.error,
            PipelineError::Ingest(IngestError::UnsupportedFileType(_))
        ));
        assert!(store.object_store().is_empty().await);
        assert_eq!(temp_entries(temp.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn broken_pdf_fails_processing_and_cleans_temp_input(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempfile::tempdir()?;
        let store = artifacts();
        let pipeline = DocumentPipeline::new(&store).with_temp_dir(temp.path());

        let outcome = pipeline
            .run(DocumentRequest {
                file_name: "broken.pdf".to_string(),
                content: b"%PDF-1.5 not really".to_vec(),
                ..Default::default()
            })
            .await;

        let failure = outcome.into_result().expect_err("pdf is corrupt");
        assert_eq!(failure.stage, PipelineStage::ProcessDocument);
        assert!(failure.to_string().starts_with("stage process_document failed"));
        assert_eq!(temp_entries(temp.path()), 0);
        assert!(store.object_store().is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn empty_upload_fails_before_routing() {
        let store = artifacts();
        let outcome = DocumentPipeline::new(&store)
            .run(DocumentRequest {
                file_name: "empty.pdf".to_string(),
                ..Default::default()
            })
            .await;

        let failure = outcome.into_result().expect_err("no content");
        assert_eq!(failure.stage, PipelineStage::ExtractMetadata);
        assert!(failure.document_id.is_none());
    }

    #[tokio::test]
    async fn pdf_request_applies_defaults_and_writes_artifacts(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempfile::tempdir()?;
        let store = artifacts();
        let pipeline = DocumentPipeline::new(&store).with_temp_dir(temp.path());
        let body = sentence("scope", 200);

        let output = pipeline
            .run(DocumentRequest {
                file_name: "Montana-RFP.PDF".to_string(),
                content: pdf_with_pages(&[&body, ""]),
                ..Default::default()
            })
            .await
            .into_result()?;

        let metadata = &output.document.metadata;
        assert_eq!(metadata.document_name, "Montana-RFP");
        assert_eq!(metadata.file_extension, ".pdf");
        assert_eq!(metadata.location, "Unknown");
        assert_eq!(metadata.year, 2024);
        assert_eq!(metadata.doc_type, DocType::Other("general".to_string()));
        assert_eq!(metadata.checksum.len(), 64);
        assert!(Uuid::parse_str(&metadata.document_id).is_ok());
        assert_eq!(metadata.total_pages, 2);
        assert_eq!(output.document.pages.len(), 1);
        assert_eq!(output.document.total_chunks(), 1);
        assert_eq!(output.written.chunks.len(), 1);
        assert_eq!(temp_entries(temp.path()), 0);

        let manifest = store.read_manifest(metadata.document_id.as_str()).await?;
        assert_eq!(manifest.total_chunks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn word_request_uses_word_profile() -> Result<(), Box<dyn std::error::Error>> {
        let store = artifacts();
        let body = format!(
            "{}{}{}",
            paragraph(&sentence("intro", 120)),
            page_break(),
            paragraph(&sentence("pricing", 1_500)),
        );

        let output = DocumentPipeline::new(&store)
            .run(DocumentRequest {
                document_name: "Vendor Response".to_string(),
                file_name: "vendor.docx".to_string(),
                content: docx_with_body(&body),
                location: Some("Montana".to_string()),
                year: Some(2025),
                doc_type: Some("Response".to_string()),
            })
            .await
            .into_result()?;

        let document = &output.document;
        assert_eq!(document.metadata.doc_type, DocType::Response);
        assert_eq!(document.metadata.total_pages, 2);
        let first = document.chunks().next().ok_or("no chunks")?;
        assert_eq!(first.metadata.chunk_size, 1_000);
        assert_eq!(first.metadata.chunk_method.as_deref(), Some("smart_word_doc_processor"));
        let indices: Vec<u64> = document.chunks().map(|chunk| chunk.chunk_index).collect();
        assert_eq!(indices, (0..indices.len() as u64).collect::<Vec<_>>());
        assert!(indices.len() >= 3);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_stage_writes_one_blob_per_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let store = artifacts();
        let output = DocumentPipeline::new(&store)
            .run(DocumentRequest {
                file_name: "rfp.pdf".to_string(),
                content: pdf_with_pages(&[&sentence("item", 600)]),
                ..Default::default()
            })
            .await
            .into_result()?;
        let document_id = output.document.document_id().to_string();

        let client = EmbeddingClient::new(HashingEmbeddings::new(16), "offline");
        let report = embed_document(&store, &client, &document_id).await?;

        assert_eq!(report.total_chunks, output.document.total_chunks());
        assert_eq!(report.dimensions, 16);
        assert_eq!(report.blob_names[0], format!("{document_id}/chunk-0.json"));
        let embedded = store.read_embedded_chunks(&document_id).await?;
        assert_eq!(embedded.len(), report.total_chunks);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_unknown_document_is_not_found() {
        let store = artifacts();
        let client = EmbeddingClient::new(HashingEmbeddings::new(8), "offline");
        let error = embed_document(&store, &client, "missing")
            .await
            .expect_err("nothing to embed");
        assert!(error.is_not_found());
    }
}
