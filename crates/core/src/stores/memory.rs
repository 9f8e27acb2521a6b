use crate::error::StorageError;
use crate::graph::{GraphStatement, NodeRef, Properties};
use crate::models::SearchRecord;
use crate::search::{IndexSchema, IndexingOutcome};
use crate::traits::{GraphStore, ObjectStore, SearchIndexService};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    containers: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub async fn len(&self, container: &str) -> usize {
        self.containers
            .lock()
            .await
            .get(container)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.containers
            .lock()
            .await
            .values()
            .all(BTreeMap::is_empty)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        self.containers
            .lock()
            .await
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let mut containers = self.containers.lock().await;
        let Some(blobs) = containers.get_mut(container) else {
            return Err(StorageError::NotFound {
                container: container.to_string(),
                key: String::new(),
            });
        };
        blobs.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.containers
            .lock()
            .await
            .get(container)
            .and_then(|blobs| blobs.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .containers
            .lock()
            .await
            .get(container)
            .map(|blobs| {
                blobs
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<String, (String, Properties)>,
    edges: BTreeSet<(String, String, String)>,
}

/// Applies merge statements to an in-process graph so repeated builds can
/// be compared.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
}

impl MemoryGraphStore {
    /// `(nodes, edges)`.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.nodes.len(), state.edges.len())
    }

    pub async fn nodes_with_label(&self, label: &str) -> usize {
        self.state
            .lock()
            .await
            .nodes
            .values()
            .filter(|(node_label, _)| node_label == label)
            .count()
    }

    pub async fn node_properties(&self, node: &NodeRef) -> Option<Properties> {
        self.state
            .lock()
            .await
            .nodes
            .get(&node.identity())
            .map(|(_, properties)| properties.clone())
    }

    pub async fn has_edge(&self, from: &NodeRef, relationship: &str, to: &NodeRef) -> bool {
        self.state.lock().await.edges.contains(&(
            from.identity(),
            relationship.to_string(),
            to.identity(),
        ))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn run(&self, statement: &GraphStatement) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        match statement {
            GraphStatement::MergeNode { node, properties } => {
                let entry = state
                    .nodes
                    .entry(node.identity())
                    .or_insert_with(|| (node.label.clone(), node.key.clone()));
                entry.1.extend(properties.clone());
            }
            GraphStatement::MergeEdge {
                from,
                relationship,
                to,
            } => {
                let (from, to) = (from.identity(), to.identity());
                // Unmatched endpoints create nothing.
                if state.nodes.contains_key(&from) && state.nodes.contains_key(&to) {
                    state.edges.insert((from, relationship.clone(), to));
                } else {
                    debug!(%from, %to, %relationship, "edge endpoints missing");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SearchState {
    indexes: BTreeMap<String, IndexSchema>,
    documents: BTreeMap<String, BTreeMap<String, SearchRecord>>,
    upload_calls: usize,
}

#[derive(Debug, Default)]
pub struct MemorySearchService {
    state: Mutex<SearchState>,
    rejected_keys: BTreeSet<String>,
}

impl MemorySearchService {
    /// Records with this key are reported as failed on upload.
    pub fn with_rejected_key(mut self, key: impl Into<String>) -> Self {
        self.rejected_keys.insert(key.into());
        self
    }

    pub async fn documents(&self, index: &str) -> Vec<SearchRecord> {
        self.state
            .lock()
            .await
            .documents
            .get(index)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn upload_calls(&self) -> usize {
        self.state.lock().await.upload_calls
    }
}

#[async_trait]
impl SearchIndexService for MemorySearchService {
    async fn get_index(&self, name: &str) -> Result<Option<IndexSchema>, StorageError> {
        Ok(self.state.lock().await.indexes.get(name).cloned())
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), StorageError> {
        self.state
            .lock()
            .await
            .indexes
            .entry(schema.name.clone())
            .or_insert_with(|| schema.clone());
        Ok(())
    }

    async fn upload_documents(
        &self,
        index: &str,
        documents: &[SearchRecord],
    ) -> Result<Vec<IndexingOutcome>, StorageError> {
        let mut state = self.state.lock().await;
        if !state.indexes.contains_key(index) {
            return Err(StorageError::NotFound {
                container: "indexes".to_string(),
                key: index.to_string(),
            });
        }
        state.upload_calls += 1;

        let mut outcomes = Vec::with_capacity(documents.len());
        for record in documents {
            if self.rejected_keys.contains(&record.id) {
                outcomes.push(IndexingOutcome {
                    key: record.id.clone(),
                    succeeded: false,
                    error_message: Some("document rejected".to_string()),
                });
                continue;
            }
            state
                .documents
                .entry(index.to_string())
                .or_default()
                .insert(record.id.clone(), record.clone());
            outcomes.push(IndexingOutcome {
                key: record.id.clone(),
                succeeded: true,
                error_message: None,
            });
        }
        Ok(outcomes)
    }
}
