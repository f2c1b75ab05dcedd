//! Client for the embedding deployment used to vectorize search queries.

use config::EmbeddingConfig;
use reqwest::Client;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::RetrievalError, http_client::http_client};

/// Azure OpenAI embeddings client.
pub struct EmbeddingClient {
    client: Client,
    url: Url,
    api_key: SecretString,
    dimensions: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Creates a client for the configured embedding deployment.
    pub fn new(config: &EmbeddingConfig) -> Self {
        let mut url = config.endpoint.clone();
        url.set_path(&format!("openai/deployments/{}/embeddings", config.deployment));

        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &config.api_version);

        Self {
            client: http_client(),
            url,
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
        }
    }

    /// Embeds a query into the deployment's vector space.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, RetrievalError> {
        let request = EmbeddingRequest {
            input,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(self.url.clone())
            .header("api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "<empty response>".to_string());

            return Err(RetrievalError::Api {
                service: "embedding service",
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or(RetrievalError::Malformed {
                service: "embedding service",
                message: "response contained no vectors".to_string(),
            })
    }
}
