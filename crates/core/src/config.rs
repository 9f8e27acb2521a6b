use crate::artifacts::ArtifactContainers;
use crate::embeddings::{DEFAULT_BATCH_SIZE, DEFAULT_PAUSE_EVERY};
use crate::error::ConfigError;
use crate::search::{GroupAssignment, DEFAULT_INDEX_NAME, DEFAULT_VECTOR_DIMENSIONS};
use crate::traits::ConfigSource;
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

pub const SEARCH_ADMIN_KEY_SECRET: &str = "AzureSearch--AdminKey";

/// Process environment. A secret `Some--Name` is read from `SOME_NAME`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl EnvConfigSource {
    pub fn secret_variable(name: &str) -> String {
        name.replace("--", "_").replace('-', "_").to_ascii_uppercase()
    }
}

impl ConfigSource for EnvConfigSource {
    fn get_env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn get_secret(&self, name: &str) -> Result<String, ConfigError> {
        let variable = Self::secret_variable(name);
        std::env::var(&variable)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing(variable))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    env: BTreeMap<String, String>,
    secrets: BTreeMap<String, String>,
}

impl MapConfigSource {
    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_secret(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), value.to_string());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn get_env(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn get_secret(&self, name: &str) -> Result<String, ConfigError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }
}

fn optional(source: &dyn ConfigSource, name: &str) -> Option<String> {
    source
        .get_env(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(source: &dyn ConfigSource, name: &str) -> Result<String, ConfigError> {
    optional(source, name).ok_or_else(|| ConfigError::Missing(name.to_string()))
}

fn parsed<T>(source: &dyn ConfigSource, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(source, name) {
        Some(raw) => raw.parse().map_err(|error: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            reason: error.to_string(),
        }),
        None => Ok(default),
    }
}

fn positive<T>(source: &dyn ConfigSource, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = parsed(source, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name: name.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(value)
}

/// The vector width, shared by the offline embedder and the search index.
pub fn vector_dimensions(source: &dyn ConfigSource) -> Result<usize, ConfigError> {
    positive(
        source,
        "AZURE_SEARCH_VECTOR_DIMENSIONS",
        DEFAULT_VECTOR_DIMENSIONS,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStorageConfig {
    pub account_url: String,
    pub sas_token: String,
    pub containers: ArtifactContainers,
}

impl BlobStorageConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let account_url = match optional(source, "AZURE_STORAGE_ACCOUNT_URL") {
            Some(url) => url,
            None => {
                let account = required(source, "AZURE_STORAGE_ACCOUNT")?;
                format!("https://{account}.blob.core.windows.net")
            }
        };
        let sas_token = match optional(source, "AZURE_STORAGE_SAS_TOKEN") {
            Some(token) => token,
            None => source.get_secret("AzureStorage--SasToken")?,
        };
        Ok(Self {
            account_url,
            sas_token,
            containers: Self::containers(source),
        })
    }

    /// Container names alone, for local runs that need no credentials.
    pub fn containers(source: &dyn ConfigSource) -> ArtifactContainers {
        let defaults = ArtifactContainers::default();
        ArtifactContainers {
            chunks: optional(source, "AZURE_STORAGE_CHUNKS_CONTAINER").unwrap_or(defaults.chunks),
            embeddings: optional(source, "AZURE_STORAGE_EMBEDDING_CONTAINER")
                .unwrap_or(defaults.embeddings),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub deployment: String,
    pub batch_size: usize,
    pub pause_every: usize,
    pub max_attempts: u32,
}

impl EmbeddingConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: required(source, "AZURE_OPENAI_ENDPOINT")?,
            api_key: required(source, "AZURE_OPENAI_API_KEY")?,
            api_version: optional(source, "AZURE_OPENAI_VERSION")
                .unwrap_or_else(|| "2024-02-01".to_string()),
            deployment: required(source, "AZURE_OPENAI_EMBEDDING_DEPLOYMENT")?,
            batch_size: Self::batch_size(source)?,
            pause_every: parsed(source, "EMBEDDING_PAUSE_EVERY", DEFAULT_PAUSE_EVERY)?,
            max_attempts: positive(source, "EMBEDDING_MAX_ATTEMPTS", 5)?,
        })
    }

    fn batch_size(source: &dyn ConfigSource) -> Result<usize, ConfigError> {
        positive(source, "EMBEDDING_BATCH_SIZE", DEFAULT_BATCH_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neo4jConfig {
    pub http_endpoint: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Neo4jConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let uri = required(source, "NEO4J_URI")?;
        Ok(Self {
            http_endpoint: http_endpoint(&uri)?,
            username: required(source, "NEO4J_USERNAME")?,
            password: required(source, "NEO4J_PASSWORD")?,
            database: optional(source, "NEO4J_DATABASE").unwrap_or_else(|| "neo4j".to_string()),
        })
    }
}

/// Maps a driver URI onto the HTTP API endpoint. `neo4j+s://host` becomes
/// `https://host`, plain `neo4j://host` or `bolt://host` becomes
/// `http://host:7474`. HTTP URIs pass through.
pub fn http_endpoint(uri: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "NEO4J_URI".to_string(),
        reason,
    };
    let parsed = Url::parse(uri).map_err(|error| invalid(error.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;

    match parsed.scheme() {
        "http" | "https" => Ok(uri.trim_end_matches('/').to_string()),
        "neo4j+s" | "neo4j+ssc" | "bolt+s" | "bolt+ssc" => Ok(format!("https://{host}")),
        "neo4j" | "bolt" => Ok(format!("http://{host}:7474")),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub endpoint: String,
    pub admin_key: String,
    pub index_name: String,
    pub vector_dimensions: usize,
    pub access_groups: Vec<String>,
    pub group_assignment: GroupAssignment,
}

impl SearchConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let access_groups: Vec<String> = required(source, "GROUP_ACCESS_LIST")?
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect();
        if access_groups.is_empty() {
            return Err(ConfigError::Invalid {
                name: "GROUP_ACCESS_LIST".to_string(),
                reason: "needs at least one group".to_string(),
            });
        }

        let group_assignment = match optional(source, "GROUP_ASSIGNMENT") {
            Some(raw) => GroupAssignment::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                name: "GROUP_ASSIGNMENT".to_string(),
                reason: format!("expected `first` or `all`, got `{raw}`"),
            })?,
            None => GroupAssignment::default(),
        };

        Ok(Self {
            endpoint: required(source, "AZURE_SEARCH_ENDPOINT")?,
            admin_key: source.get_secret(SEARCH_ADMIN_KEY_SECRET)?,
            index_name: optional(source, "AZURE_SEARCH_INDEX_NAME")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            vector_dimensions: vector_dimensions(source)?,
            access_groups,
            group_assignment,
        })
    }
}

/// Values applied when a request leaves them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefaults {
    pub location: String,
    pub year: i32,
    pub doc_type: String,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            location: "Unknown".to_string(),
            year: 2024,
            doc_type: "general".to_string(),
        }
    }
}

impl PipelineDefaults {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            location: optional(source, "DEFAULT_LOCATION").unwrap_or(defaults.location),
            year: parsed(source, "DEFAULT_YEAR", defaults.year)?,
            doc_type: optional(source, "DEFAULT_DOC_TYPE").unwrap_or(defaults.doc_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_source() -> MapConfigSource {
        MapConfigSource::default()
            .with_env("AZURE_SEARCH_ENDPOINT", "https://search.example.net")
            .with_env("GROUP_ACCESS_LIST", "group-A, group-B,")
            .with_secret(SEARCH_ADMIN_KEY_SECRET, "admin")
    }

    #[test]
    fn secret_names_map_to_environment_variables() {
        assert_eq!(
            EnvConfigSource::secret_variable("AzureSearch--AdminKey"),
            "AZURESEARCH_ADMINKEY"
        );
    }

    #[test]
    fn search_config_applies_defaults() -> Result<(), ConfigError> {
        let config = SearchConfig::from_source(&search_source())?;
        assert_eq!(config.index_name, "document-chunks");
        assert_eq!(config.vector_dimensions, 1536);
        assert_eq!(config.access_groups, vec!["group-A", "group-B"]);
        assert_eq!(config.group_assignment, GroupAssignment::FirstOnly);
        assert_eq!(config.admin_key, "admin");
        Ok(())
    }

    #[test]
    fn missing_and_invalid_values_are_reported_by_name() {
        let missing = SearchConfig::from_source(&MapConfigSource::default());
        assert!(matches!(missing, Err(ConfigError::Missing(name)) if name == "GROUP_ACCESS_LIST"));

        let invalid = SearchConfig::from_source(
            &search_source().with_env("AZURE_SEARCH_VECTOR_DIMENSIONS", "wide"),
        );
        assert!(
            matches!(invalid, Err(ConfigError::Invalid { name, .. }) if name == "AZURE_SEARCH_VECTOR_DIMENSIONS")
        );

        let no_key = SearchConfig::from_source(
            &MapConfigSource::default()
                .with_env("AZURE_SEARCH_ENDPOINT", "https://search.example.net")
                .with_env("GROUP_ACCESS_LIST", "group-A"),
        );
        assert!(matches!(no_key, Err(ConfigError::Missing(name)) if name == SEARCH_ADMIN_KEY_SECRET));
    }

    #[test]
    fn blob_config_expands_account_name() -> Result<(), ConfigError> {
        let source = MapConfigSource::default()
            .with_env("AZURE_STORAGE_ACCOUNT", "rfpdocs")
            .with_env("AZURE_STORAGE_SAS_TOKEN", "sv=1&sig=2")
            .with_env("AZURE_STORAGE_EMBEDDING_CONTAINER", "vectors");
        let config = BlobStorageConfig::from_source(&source)?;
        assert_eq!(config.account_url, "https://rfpdocs.blob.core.windows.net");
        assert_eq!(config.containers.chunks, "chunks");
        assert_eq!(config.containers.embeddings, "vectors");
        Ok(())
    }

    #[test]
    fn embedding_config_rejects_zero_batch() {
        let source = MapConfigSource::default()
            .with_env("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com")
            .with_env("AZURE_OPENAI_API_KEY", "key")
            .with_env("AZURE_OPENAI_EMBEDDING_DEPLOYMENT", "ada")
            .with_env("EMBEDDING_BATCH_SIZE", "0");
        assert!(matches!(
            EmbeddingConfig::from_source(&source),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn embedding_config_rejects_zero_attempts() {
        let source = MapConfigSource::default()
            .with_env("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com")
            .with_env("AZURE_OPENAI_API_KEY", "key")
            .with_env("AZURE_OPENAI_EMBEDDING_DEPLOYMENT", "ada")
            .with_env("EMBEDDING_MAX_ATTEMPTS", "0");
        match EmbeddingConfig::from_source(&source) {
            Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, "EMBEDDING_MAX_ATTEMPTS"),
            other => panic!("expected invalid attempts, got {other:?}"),
        }

        let source = source.with_env("EMBEDDING_MAX_ATTEMPTS", "1");
        assert!(matches!(
            EmbeddingConfig::from_source(&source),
            Ok(EmbeddingConfig { max_attempts: 1, .. })
        ));
    }

    #[test]
    fn vector_dimensions_are_validated() {
        let unset = MapConfigSource::default();
        assert!(matches!(
            vector_dimensions(&unset),
            Ok(DEFAULT_VECTOR_DIMENSIONS)
        ));

        let garbled = MapConfigSource::default().with_env("AZURE_SEARCH_VECTOR_DIMENSIONS", "wide");
        assert!(matches!(
            vector_dimensions(&garbled),
            Err(ConfigError::Invalid { .. })
        ));

        let zero = MapConfigSource::default().with_env("AZURE_SEARCH_VECTOR_DIMENSIONS", "0");
        assert!(matches!(vector_dimensions(&zero), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn neo4j_driver_uris_map_to_http() -> Result<(), ConfigError> {
        assert_eq!(http_endpoint("neo4j+s://abc.databases.neo4j.io")?, "https://abc.databases.neo4j.io");
        assert_eq!(http_endpoint("bolt://localhost:7687")?, "http://localhost:7474");
        assert_eq!(http_endpoint("http://localhost:7474/")?, "http://localhost:7474");
        assert!(http_endpoint("ftp://host").is_err());
        Ok(())
    }
}
