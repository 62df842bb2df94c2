use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::*;

/// Context retrieval over a project's indexed documents.
pub trait Retriever: Send + Sync + 'static {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        project_id: &'a str,
        top_k: usize,
        filter: Option<RetrievalFilter>,
    ) -> BoxFuture<'a, Result<Vec<ContextSnippet>>>;

    /// Run several queries, dedupe by content and sort by relevance.
    fn retrieve_multi_query<'a>(
        &'a self,
        queries: &'a [String],
        project_id: &'a str,
        top_k_per_query: usize,
    ) -> BoxFuture<'a, Result<Vec<ContextSnippet>>> {
        Box::pin(async move {
            let mut seen = HashSet::new();
            let mut merged = Vec::new();
            for query in queries {
                for snippet in self
                    .retrieve(query, project_id, top_k_per_query, None)
                    .await?
                {
                    if seen.insert(snippet.content.clone()) {
                        merged.push(snippet);
                    }
                }
            }
            merged.sort_by(|a, b| {
                b.relevance_score
                    .partial_cmp(&a.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            Ok(merged)
        })
    }
}

/// JSON schema a structured model call must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub response_schema: Option<OutputSchema>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            response_schema: None,
        }
    }

    pub fn with_schema(mut self, name: &str, schema: serde_json::Value) -> Self {
        self.response_schema = Some(OutputSchema {
            name: name.to_string(),
            schema,
        });
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    /// Parsed JSON when the request carried a response schema.
    pub structured: Option<serde_json::Value>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

/// A single chat model.
pub trait ChatModel: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>>;
}

/// Picks the model to use for a kind of task.
pub trait ModelProvider: Send + Sync + 'static {
    fn model_for_task(&self, task: TaskType) -> Result<Arc<dyn ChatModel>>;
}
