//! Retrieval backend configuration: the embedding service and the vector
//! store backing the knowledge-base tools.

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Retrieval backend configuration. When present, the `search` and
/// `report_grounding` tools are registered with the middle tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Embedding service settings.
    pub embedding: EmbeddingConfig,
    /// Document store settings.
    pub store: StoreConfig,
}

/// Azure OpenAI embeddings deployment used to embed search queries.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding resource.
    pub endpoint: Url,
    /// Name of the embedding model deployment.
    pub deployment: String,
    /// Shared key for the embedding resource.
    pub api_key: SecretString,
    /// API version sent as the `api-version` query parameter.
    #[serde(default = "default_embedding_api_version")]
    pub api_version: String,
    /// Requested embedding dimensionality. The deployment default is used
    /// when unset.
    #[serde(default)]
    pub dimensions: Option<u32>,
}

fn default_embedding_api_version() -> String {
    "2024-06-01".to_string()
}

/// pgvector-backed document store reached over its REST interface.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Base URL of the store, e.g. `https://example.supabase.co`.
    pub url: Url,
    /// Service role key, sent as both `apikey` and bearer.
    pub service_key: SecretString,
    /// Document table name.
    #[serde(default = "default_table")]
    pub table: String,
    /// Nearest-neighbour RPC function name.
    #[serde(default = "default_match_function")]
    pub match_function: String,
    /// Number of rows requested from the nearest-neighbour routine.
    #[serde(default = "default_match_count")]
    pub match_count: u32,
}

fn default_table() -> String {
    "documents".to_string()
}

fn default_match_function() -> String {
    "match_documents".to_string()
}

fn default_match_count() -> u32 {
    5
}
