use crate::error::EmbedError;
use crate::traits::EmbeddingBackend;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

const BACKEND: &str = "azure-openai";

/// Embeddings deployment on an Azure OpenAI resource. The `model` passed to
/// `create_embeddings` is the deployment name.
pub struct AzureOpenAiEmbeddings {
    client: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

impl AzureOpenAiEmbeddings {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: api_version.into(),
        }
    }

    fn embeddings_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{deployment}/embeddings?api-version={}",
            self.endpoint, self.api_version
        )
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Puts vectors back in input order using each item's `index`.
fn ordered_vectors(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if response.data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            actual: response.data.len(),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        let slot = slots.get_mut(item.index).ok_or_else(|| EmbedError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("embedding index {} out of range", item.index),
        })?;
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| EmbedError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("missing embedding for input {index}"),
            })
        })
        .collect()
}

#[async_trait]
impl EmbeddingBackend for AzureOpenAiEmbeddings {
    async fn create_embeddings(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.embeddings_url(model))
            .header("api-key", &self.api_key)
            .json(&json!({ "input": inputs }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("unspecified")
                .to_string();
            return Err(EmbedError::Throttled(format!("retry-after {retry_after}")));
        }
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbedError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {details}"),
            });
        }

        ordered_vectors(response.json().await?, inputs.len())
    }
}
