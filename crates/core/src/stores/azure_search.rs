use crate::error::StorageError;
use crate::models::SearchRecord;
use crate::search::{IndexSchema, IndexingOutcome};
use crate::traits::SearchIndexService;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const API_VERSION: &str = "2023-11-01";
const BACKEND: &str = "azure-search";

pub struct AzureSearchService {
    client: Arc<Client>,
    endpoint: String,
    api_key: String,
}

impl AzureSearchService {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: Arc::new(Client::new()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn index_url(&self, name: &str) -> String {
        format!("{}/indexes/{name}?api-version={API_VERSION}", self.endpoint)
    }

    fn docs_url(&self, name: &str) -> String {
        format!(
            "{}/indexes/{name}/docs/index?api-version={API_VERSION}",
            self.endpoint
        )
    }
}

#[derive(Debug, Deserialize)]
struct IndexBatchResponse {
    #[serde(default)]
    value: Vec<IndexResult>,
}

#[derive(Debug, Deserialize)]
struct IndexResult {
    key: String,
    status: bool,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

fn upload_payload(records: &[SearchRecord]) -> Result<Value, StorageError> {
    let mut actions = Vec::with_capacity(records.len());
    for record in records {
        let mut document = serde_json::to_value(record)?;
        if let Value::Object(fields) = &mut document {
            fields.insert("@search.action".to_string(), json!("upload"));
        }
        actions.push(document);
    }
    Ok(json!({ "value": actions }))
}

#[async_trait]
impl SearchIndexService for AzureSearchService {
    async fn get_index(&self, name: &str) -> Result<Option<IndexSchema>, StorageError> {
        let response = self
            .client
            .get(self.index_url(name))
            .header("api-key", &self.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StorageError::backend(BACKEND, response.status().to_string()));
        }
        Ok(Some(response.json().await?))
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.index_url(&schema.name))
            .header("api-key", &self.api_key)
            .json(schema)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                debug!(index = %schema.name, "search index already exists");
                Ok(())
            }
            status => {
                let details = response.text().await.unwrap_or_default();
                Err(StorageError::Request(format!(
                    "search index setup failed with {status}: {details}"
                )))
            }
        }
    }

    async fn upload_documents(
        &self,
        index: &str,
        documents: &[SearchRecord],
    ) -> Result<Vec<IndexingOutcome>, StorageError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.docs_url(index))
            .header("api-key", &self.api_key)
            .json(&upload_payload(documents)?)
            .send()
            .await?;

        // 207 carries per-document failures in the same body shape as 200.
        if !response.status().is_success() {
            return Err(StorageError::backend(BACKEND, response.status().to_string()));
        }

        let body: IndexBatchResponse = response.json().await?;
        Ok(body
            .value
            .into_iter()
            .map(|result| IndexingOutcome {
                key: result.key,
                succeeded: result.status,
                error_message: result.error_message,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn upload_payload_tags_every_document() -> Result<(), StorageError> {
        let record = SearchRecord {
            id: "doc-1_0".to_string(),
            document_id: "doc-1".to_string(),
            create_date: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().ok_or_else(|| {
                StorageError::Request("bad timestamp".to_string())
            })?,
            page_number: 2,
            location: None,
            year: Some(2025),
            doc_type: Some("request".to_string()),
            chunk_index: 0,
            content: "scope".to_string(),
            vector: vec![0.5],
            group_id: vec!["group-A".to_string()],
        };

        let payload = upload_payload(&[record])?;
        let document = &payload["value"][0];
        assert_eq!(document["@search.action"], "upload");
        assert_eq!(document["create_date"], "2025-03-01T12:00:00Z");
        assert!(document.get("location").is_none());
        assert_eq!(document["group_id"], json!(["group-A"]));
        Ok(())
    }

    #[test]
    fn batch_response_parses_per_document_status() -> Result<(), serde_json::Error> {
        let body: IndexBatchResponse = serde_json::from_value(json!({
            "value": [
                {"key": "a", "status": true, "errorMessage": null, "statusCode": 201},
                {"key": "b", "status": false, "errorMessage": "bad vector", "statusCode": 400}
            ]
        }))?;
        assert_eq!(body.value.len(), 2);
        assert!(!body.value[1].status);
        assert_eq!(body.value[1].error_message.as_deref(), Some("bad vector"));
        Ok(())
    }

    #[test]
    fn index_urls_use_the_pinned_api_version() {
        let service = AzureSearchService::new("https://search.example.net/", "key");
        assert_eq!(
            service.index_url("document-chunks"),
            "https://search.example.net/indexes/document-chunks?api-version=2023-11-01"
        );
    }
}
