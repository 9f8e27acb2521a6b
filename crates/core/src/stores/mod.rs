pub mod azure_blob;
pub mod azure_openai;
pub mod azure_search;
pub mod local;
pub mod memory;
pub mod neo4j;

pub use azure_blob::AzureBlobStore;
pub use azure_openai::AzureOpenAiEmbeddings;
pub use azure_search::AzureSearchService;
pub use local::LocalObjectStore;
pub use memory::{MemoryGraphStore, MemoryObjectStore, MemorySearchService};
pub use neo4j::Neo4jStore;
