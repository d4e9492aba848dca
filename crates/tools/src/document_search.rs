//! `document_search` — retrieval over the ingested document corpus.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use taskrag_core::tool::{ArgumentSchema, FieldSpec, HandlerError, ToolHandler};

use crate::retrieval::RetrievalGateway;

pub const NAME: &str = "document_search";
pub const DESCRIPTION: &str = "Search the user's private documents. Returns the most relevant text \
     chunks with their source document and similarity score.";

pub fn schema() -> ArgumentSchema {
    ArgumentSchema::new()
        .field(
            FieldSpec::string("query")
                .required()
                .max_len(1000)
                .describe("What to look for in the documents"),
        )
        .field(
            FieldSpec::integer("k")
                .range(1, 20)
                .describe("Maximum number of chunks to return"),
        )
}

pub struct DocumentSearchTool {
    gateway: Arc<RetrievalGateway>,
}

impl DocumentSearchTool {
    pub fn new(gateway: Arc<RetrievalGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for DocumentSearchTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError> {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        let k = args
            .get("k")
            .and_then(Value::as_u64)
            .map_or(self.gateway.default_k(), |k| k as usize);

        let result = self.gateway.retrieve(query, k).await?;
        let results: Vec<Value> = result
            .chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "document_id": c.document_id,
                    "position": c.position,
                    "text": c.text,
                    "score": c.score,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "query": result.query,
            "count": results.len(),
            "results": results,
        }))
    }
}
