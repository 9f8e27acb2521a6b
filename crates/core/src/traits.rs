use crate::error::{ConfigError, EmbedError, StorageError};
use crate::graph::GraphStatement;
use crate::models::SearchRecord;
use crate::search::{IndexSchema, IndexingOutcome};
use async_trait::async_trait;
use std::time::Duration;

/// Named containers of keyed blobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creating a container that already exists succeeds.
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError>;

    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Returns `StorageError::NotFound` for a missing key.
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Keys under `prefix`, in no guaranteed order.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn run(&self, statement: &GraphStatement) -> Result<(), StorageError>;

    async fn run_all(&self, statements: &[GraphStatement]) -> Result<(), StorageError> {
        for statement in statements {
            self.run(statement).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait SearchIndexService: Send + Sync {
    async fn get_index(&self, name: &str) -> Result<Option<IndexSchema>, StorageError>;

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), StorageError>;

    /// Per-record outcomes; a failed record does not fail the batch.
    async fn upload_documents(
        &self,
        index: &str,
        documents: &[SearchRecord],
    ) -> Result<Vec<IndexingOutcome>, StorageError>;
}

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// One vector per input, in input order. Rate limiting surfaces as
    /// `EmbedError::Throttled`.
    async fn create_embeddings(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Plain settings and named secrets.
pub trait ConfigSource: Send + Sync {
    fn get_env(&self, name: &str) -> Option<String>;

    fn get_secret(&self, name: &str) -> Result<String, ConfigError>;
}
