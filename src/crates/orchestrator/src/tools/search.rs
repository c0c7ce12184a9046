//! `search_tool`: web search over a pluggable backend.

use super::{required_str, Tool, ToolInput, ToolOutput};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Web search backend
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 10;

/// Web search tool
pub struct SearchTool {
    backend: Arc<dyn WebSearch>,
}

impl SearchTool {
    pub fn new(backend: Arc<dyn WebSearch>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search_tool"
    }

    fn description(&self) -> &str {
        "Searches the web for current information and returns titles, snippets and links."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_LIMIT}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput> {
        let query = required_str(&input, "query")?;
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| (l as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let hits = self.backend.search(query, limit).await?;
        Ok(json!({
            "query": query,
            "results": hits.into_iter().take(limit).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrchestratorError;

    struct FixedSearch;

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
            if query == "fail" {
                return Err(OrchestratorError::Tool("connection reset".to_string()));
            }
            Ok((0..limit + 2)
                .map(|i| SearchHit {
                    title: format!("{} {}", query, i),
                    snippet: "snippet".to_string(),
                    url: format!("https://example.com/{}", i),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_search_limits_results() {
        let tool = SearchTool::new(Arc::new(FixedSearch));
        let output = tool.execute(json!({"query": "weather Ankara", "limit": 2})).await.unwrap();
        assert_eq!(output["query"], "weather Ankara");
        assert_eq!(output["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let tool = SearchTool::new(Arc::new(FixedSearch));
        assert!(tool.execute(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let tool = SearchTool::new(Arc::new(FixedSearch));
        let err = tool.execute(json!({"query": "fail"})).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
