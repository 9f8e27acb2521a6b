use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("{kind} extraction failed: {details}")]
    Extraction { kind: &'static str, details: String },

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl IngestError {
    pub fn pdf(details: impl Into<String>) -> Self {
        Self::Extraction {
            kind: "pdf",
            details: details.into(),
        }
    }

    pub fn word(details: impl Into<String>) -> Self {
        Self::Extraction {
            kind: "word",
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage request failed: {0}")]
    Request(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn backend(backend: &str, details: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend throttled the request: {0}")]
    Throttled(String),

    #[error("rate limit still exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding count {actual} doesn't match input count {expected}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(String),

    #[error("invalid configuration value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

impl PipelineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(error) if error.is_not_found())
    }
}
