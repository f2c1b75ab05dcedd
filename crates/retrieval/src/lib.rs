//! Knowledge-base tools for the realtime middle tier: `search` over a
//! pgvector-backed document store, and `report_grounding` for citing the
//! passages an answer was built from.

use std::sync::Arc;

use config::RetrievalConfig;
use realtime::{Tool, ToolRegistry};
use serde_json::json;

mod embedding;
mod error;
mod grounding;
mod http_client;
mod search;
mod store;

pub use embedding::EmbeddingClient;
pub use error::RetrievalError;
pub use store::DocumentStore;

use grounding::GroundingTool;
use search::SearchTool;

/// Registers the knowledge-base tools backed by the configured embedding
/// service and document store.
pub fn register(registry: &mut ToolRegistry, config: &RetrievalConfig) {
    let embedding = Arc::new(EmbeddingClient::new(&config.embedding));
    let store = Arc::new(DocumentStore::new(&config.store));

    registry.register(
        "search",
        Tool::new(search_schema(), Arc::new(SearchTool::new(embedding, store.clone()))),
    );

    registry.register(
        "report_grounding",
        Tool::new(grounding_schema(), Arc::new(GroundingTool::new(store))),
    );
}

fn search_schema() -> serde_json::Value {
    json!({
        "type": "function",
        "name": "search",
        "description": "Search the knowledge base. The knowledge base is in English, translate to and from English if \
                        needed. Results are formatted as a source name first in square brackets, followed by the text \
                        content, and a line with '-----' at the end of each result.",
        "parameters": {
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }
    })
}

fn grounding_schema() -> serde_json::Value {
    json!({
        "type": "function",
        "name": "report_grounding",
        "description": "Report use of a source from the knowledge base as part of an answer (effectively, cite the source). Sources \
                        appear in square brackets before each knowledge base passage. Always use this tool to cite sources when responding \
                        with information from the knowledge base.",
        "parameters": {
            "type": "object",
            "properties": {
                "sources": {
                    "type": "array",
                    "items": {
                        "type": "string"
                    },
                    "description": "List of source names from last statement actually used, do not include the ones not used to formulate a response"
                }
            },
            "required": ["sources"],
            "additionalProperties": false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_declare_their_required_parameters() {
        let search = search_schema();
        assert_eq!(search["name"], json!("search"));
        assert_eq!(search["parameters"]["required"], json!(["query"]));

        let grounding = grounding_schema();
        assert_eq!(grounding["name"], json!("report_grounding"));
        assert_eq!(grounding["parameters"]["required"], json!(["sources"]));
        assert_eq!(grounding["parameters"]["properties"]["sources"]["type"], json!("array"));
    }
}
