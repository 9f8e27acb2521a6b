use crate::error::StorageError;
use crate::traits::ObjectStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Object store on the local filesystem. Containers are directories under
/// `root`; keys are relative paths inside them.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(relative_path(container)?))
    }

    fn blob_path(&self, container: &str, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.container_path(container)?.join(relative_path(key)?))
    }
}

/// Rejects keys that would escape the container directory.
fn relative_path(name: &str) -> Result<PathBuf, StorageError> {
    let path = Path::new(name);
    let is_plain = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !is_plain {
        return Err(StorageError::Request(format!("invalid object name: {name}")));
    }
    Ok(path.to_path_buf())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.container_path(container)?).await?;
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.blob_path(container, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.blob_path(container, key)?).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.container_path(container)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).into_iter().filter_map(|item| item.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&base) else {
                continue;
            };
            let key = relative
                .components()
                .filter_map(|component| component.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }
}
