//! The `report_grounding` tool: surface the knowledge-base passages an
//! answer was built from to the client UI.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use realtime::{ToolHandler, ToolResult};
use regex::Regex;
use serde_json::{Value, json};

use crate::{error::RetrievalError, store::DocumentStore};

/// Source identifiers the store will be queried with. Anything else in the
/// model's `sources` list is discarded as a potential injection attempt.
fn source_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_=\-]+$").expect("source id regex must be valid"))
}

pub(crate) struct GroundingTool {
    store: Arc<DocumentStore>,
}

impl GroundingTool {
    pub(crate) fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    async fn fetch(&self, sources: &[String]) -> Result<Value, RetrievalError> {
        let rows = self.store.fetch_by_ids(sources).await?;

        let docs: Vec<Value> = rows
            .iter()
            .map(|row| {
                let chunk_id = match row.id.as_ref() {
                    Some(Value::String(id)) => id.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };

                json!({
                    "chunk_id": chunk_id,
                    "title": row.title(),
                    "chunk": row.content,
                })
            })
            .collect();

        Ok(json!({ "sources": docs }))
    }
}

#[async_trait]
impl ToolHandler for GroundingTool {
    async fn call(&self, args: Value) -> ToolResult {
        let sources = filter_sources(&args);

        log::debug!("grounding sources: {}", sources.join(" OR "));

        match self.fetch(&sources).await {
            Ok(value) => ToolResult::Client(value),
            Err(err) => {
                log::warn!("grounding lookup failed: {err}");

                ToolResult::Client(json!(format!("Error reporting grounding: {err}")))
            }
        }
    }
}

fn filter_sources(args: &Value) -> Vec<String> {
    args.get("sources")
        .and_then(Value::as_array)
        .map(|sources| {
            sources
                .iter()
                .filter_map(Value::as_str)
                .filter(|source| source_id_regex().is_match(source))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_attempts_are_filtered_out() {
        let args = json!({"sources": ["good_1", "DROP TABLE x", "also-ok_2", "§nope", "id=base64_="]});

        assert_eq!(filter_sources(&args), ["good_1", "also-ok_2", "id=base64_="]);
    }

    #[test]
    fn filtering_is_deterministic() {
        let args = json!({"sources": ["b_2", "a_1", "b_2"]});

        assert_eq!(filter_sources(&args), filter_sources(&args));
    }

    #[test]
    fn missing_or_malformed_sources_yield_nothing() {
        assert!(filter_sources(&json!({})).is_empty());
        assert!(filter_sources(&json!({"sources": "not-a-list"})).is_empty());
        assert!(filter_sources(&json!({"sources": [1, 2]})).is_empty());
    }
}
