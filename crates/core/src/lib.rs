pub mod artifacts;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod stores;
pub mod traits;

pub use artifacts::{
    ArtifactCategory, ArtifactContainers, ArtifactKey, ArtifactStore, BlobWriteReport,
    DocumentManifest, PageArtifact,
};
pub use chunking::{build_document_pages, ChunkingConfig, ChunkingProfiles, RecursiveSplitter};
pub use config::{
    BlobStorageConfig, EmbeddingConfig, EnvConfigSource, MapConfigSource, Neo4jConfig,
    PipelineDefaults, SearchConfig,
};
pub use embeddings::{EmbeddingClient, HashingEmbeddings, RetryPolicy};
pub use error::{ConfigError, EmbedError, IngestError, PipelineError, StorageError};
pub use extractor::{extract, extract_document, file_extension, FileKind};
pub use graph::{
    GraphBuildReport, GraphProjectionBuilder, GraphSchema, GraphSchemaKind, GraphStatement,
    RequestGraphSchema, ResponseGraphSchema,
};
pub use models::{
    Chunk, ChunkMetadata, DocType, DocumentMetadata, DocumentPage, EmbeddedChunk, Page,
    ProcessedDocument, SearchRecord,
};
pub use pipeline::{
    embed_document, DocumentPipeline, DocumentRequest, EmbedReport, PipelineFailure,
    PipelineOutcome, PipelineOutput, PipelineStage,
};
pub use search::{
    GroupAssignment, IndexEnsure, IndexSchema, IndexingOutcome, SearchProjectionUploader,
    UploadReport,
};
pub use stores::{
    AzureBlobStore, AzureOpenAiEmbeddings, AzureSearchService, LocalObjectStore,
    MemoryGraphStore, MemoryObjectStore, MemorySearchService, Neo4jStore,
};
pub use traits::{
    ConfigSource, EmbeddingBackend, GraphStore, ObjectStore, SearchIndexService, Sleeper,
    TokioSleeper,
};
