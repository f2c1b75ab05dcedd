//! Client for the pgvector-backed document store, reached over its REST
//! interface.

use config::StoreConfig;
use reqwest::Client;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::{error::RetrievalError, http_client::http_client};

/// Document store client. The nearest-neighbour routine lives in the
/// database as an RPC function; row fetches go through the table endpoint.
pub struct DocumentStore {
    client: Client,
    base: Url,
    service_key: SecretString,
    table: String,
    match_function: String,
    match_count: u32,
}

/// Row returned by the nearest-neighbour routine.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentMatch {
    /// Row identifier; numeric in some deployments.
    #[serde(default)]
    pub id: Option<Value>,
    /// Passage text.
    #[serde(default)]
    pub content: String,
}

/// Row fetched by identifier for grounding.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRow {
    /// Row identifier; numeric in some deployments.
    #[serde(default)]
    pub id: Option<Value>,
    /// Passage text.
    #[serde(default)]
    pub content: String,
    /// Free-form row metadata; `metadata.title` is surfaced to clients.
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl DocumentRow {
    /// The title surfaced to clients, defaulting when the row has none.
    pub fn title(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
    }
}

impl DocumentStore {
    /// Creates a client for the configured store.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            client: http_client(),
            base: config.url.clone(),
            service_key: config.service_key.clone(),
            table: config.table.clone(),
            match_function: config.match_function.clone(),
            match_count: config.match_count,
        }
    }

    /// Runs the nearest-neighbour routine over the query embedding.
    pub async fn nearest(&self, embedding: &[f32]) -> Result<Vec<DocumentMatch>, RetrievalError> {
        let mut url = self.base.clone();
        url.set_path(&format!("rest/v1/rpc/{}", self.match_function));

        let body = json!({
            "query_embedding": embedding,
            "match_count": self.match_count,
            "filter": {},
        });

        let response = self.authorized(self.client.post(url)).json(&body).send().await?;

        self.parse(response).await
    }

    /// Fetches rows by identifier. Identifiers must already be validated;
    /// they are quoted into a PostgREST `in.(…)` filter.
    pub async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<DocumentRow>, RetrievalError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let list = ids.iter().map(|id| format!("\"{id}\"")).collect::<Vec<_>>().join(",");

        let mut url = self.base.clone();
        url.set_path(&format!("rest/v1/{}", self.table));

        url.query_pairs_mut()
            .clear()
            .append_pair("select", "*")
            .append_pair("id", &format!("in.({list})"));

        let response = self.authorized(self.client.get(url)).send().await?;

        self.parse(response).await
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", self.service_key.expose_secret())
            .bearer_auth(self.service_key.expose_secret())
    }

    async fn parse<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, RetrievalError> {
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "<empty response>".to_string());

            return Err(RetrievalError::Api {
                service: "document store",
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_defaults_when_metadata_is_missing() {
        let row: DocumentRow = serde_json::from_value(json!({"id": "doc_1", "content": "text"})).unwrap();
        assert_eq!(row.title(), "Untitled");

        let row: DocumentRow =
            serde_json::from_value(json!({"id": "doc_1", "content": "text", "metadata": {"title": "Handbook"}}))
                .unwrap();
        assert_eq!(row.title(), "Handbook");

        let row: DocumentRow =
            serde_json::from_value(json!({"id": "doc_1", "content": "text", "metadata": {"author": "a"}})).unwrap();
        assert_eq!(row.title(), "Untitled");
    }

    #[test]
    fn rows_tolerate_numeric_identifiers() {
        let row: DocumentMatch = serde_json::from_value(json!({"id": 42, "content": "text"})).unwrap();
        assert_eq!(row.id, Some(json!(42)));
    }
}
