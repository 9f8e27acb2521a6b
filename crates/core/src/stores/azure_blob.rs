use crate::error::StorageError;
use crate::traits::ObjectStore;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2021-08-06";
const BACKEND: &str = "azure-blob";

/// Blob storage over the REST API, authorised with a SAS token.
pub struct AzureBlobStore {
    client: Client,
    account_url: Url,
    sas_token: String,
}

impl AzureBlobStore {
    pub fn new(account_url: &str, sas_token: impl Into<String>) -> Result<Self, StorageError> {
        let sas_token: String = sas_token.into();
        Ok(Self {
            client: Client::new(),
            account_url: Url::parse(account_url)?,
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, StorageError> {
        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Request(format!("invalid account url {}", self.account_url)))?
            .pop_if_empty()
            .extend(segments.iter().flat_map(|segment| segment.split('/')));
        url.set_query(Some(&self.sas_token));
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<BlobListPage, StorageError> {
        let mut query = vec![("restype", "container"), ("comp", "list")];
        if !prefix.is_empty() {
            query.push(("prefix", prefix));
        }
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let response = self
            .client
            .get(self.url(&[container], &query)?)
            .header("x-ms-version", API_VERSION)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(BlobListPage::default());
        }
        if !response.status().is_success() {
            return Err(StorageError::backend(BACKEND, response.status().to_string()));
        }

        parse_blob_list(&response.text().await?)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BlobListPage {
    names: Vec<String>,
    next_marker: Option<String>,
}

fn parse_blob_list(xml: &str) -> Result<BlobListPage, StorageError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = BlobListPage::default();
    let mut path: Vec<Vec<u8>> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => path.push(element.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|error| StorageError::backend(BACKEND, error.to_string()))?;
                let in_blob_name = path.len() >= 2
                    && path[path.len() - 1] == b"Name"
                    && path[path.len() - 2] == b"Blob";
                if in_blob_name {
                    page.names.push(value.into_owned());
                } else if path.last().is_some_and(|name| name == b"NextMarker") && !value.is_empty() {
                    page.next_marker = Some(value.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => return Err(StorageError::backend(BACKEND, error.to_string())),
        }
    }
    Ok(page)
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.url(&[container], &[("restype", "container")])?)
            .header("x-ms-version", API_VERSION)
            .header("Content-Length", "0")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                debug!(container, "blob container already exists");
                Ok(())
            }
            status => Err(StorageError::backend(BACKEND, status.to_string())),
        }
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.url(&[container, key], &[])?)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::backend(
                BACKEND,
                format!("upload of {container}/{key} failed with {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(self.url(&[container, key], &[])?)
            .header("x-ms-version", API_VERSION)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(StorageError::backend(
                BACKEND,
                format!("download of {container}/{key} failed with {}", response.status()),
            ));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(container, prefix, marker.as_deref()).await?;
            names.extend(page.names);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(names)
    }
}
