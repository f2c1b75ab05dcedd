//! The `search` tool: embed the query, run the nearest-neighbour routine,
//! format the matches for the model.

use std::sync::Arc;

use async_trait::async_trait;
use realtime::{ToolHandler, ToolResult};
use serde_json::Value;

use crate::{
    embedding::EmbeddingClient,
    error::RetrievalError,
    store::{DocumentMatch, DocumentStore},
};

const NO_RESULTS: &str = "No relevant information found in the knowledge base.";

pub(crate) struct SearchTool {
    embedding: Arc<EmbeddingClient>,
    store: Arc<DocumentStore>,
}

impl SearchTool {
    pub(crate) fn new(embedding: Arc<EmbeddingClient>, store: Arc<DocumentStore>) -> Self {
        Self { embedding, store }
    }

    async fn search(&self, query: &str) -> Result<String, RetrievalError> {
        let embedding = self.embedding.embed(query).await?;
        let matches = self.store.nearest(&embedding).await?;

        Ok(format_matches(&matches))
    }
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, args: Value) -> ToolResult {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();

        log::debug!("searching the knowledge base for '{query}'");

        match self.search(query).await {
            Ok(text) => ToolResult::Server(text),
            Err(err) => {
                log::warn!("knowledge base search failed: {err}");

                ToolResult::Server(format!("Error searching knowledge base: {err}"))
            }
        }
    }
}

fn format_matches(matches: &[DocumentMatch]) -> String {
    if matches.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut out = String::new();

    for row in matches {
        out.push_str(&format!("[{}]: {}\n-----\n", id_text(row.id.as_ref()), row.content));
    }

    out
}

fn id_text(id: Option<&Value>) -> String {
    match id {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}
