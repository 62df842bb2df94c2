use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::json;

use aiden_core::error::Result;
use aiden_core::traits::Retriever;
use aiden_core::types::{ContextSnippet, RetrievalFilter};

/// An in-memory retriever: document chunks by document id plus a fixed
/// list of context snippets for free queries.
#[derive(Default)]
pub struct StaticRetriever {
    documents: HashMap<String, Vec<String>>,
    context: Vec<ContextSnippet>,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, document_id: &str, chunks: &[&str]) -> Self {
        self.documents.insert(
            document_id.to_string(),
            chunks.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_context(mut self, content: &str, relevance_score: f64) -> Self {
        self.context.push(ContextSnippet {
            content: content.to_string(),
            metadata: json!({ "doc_type": "dev_request" }),
            relevance_score,
        });
        self
    }

    /// Queries received so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl Retriever for StaticRetriever {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        _project_id: &'a str,
        top_k: usize,
        filter: Option<RetrievalFilter>,
    ) -> BoxFuture<'a, Result<Vec<ContextSnippet>>> {
        self.queries.lock().unwrap().push(query.to_string());
        let snippets = match filter.and_then(|f| f.document_id) {
            Some(document_id) => self
                .documents
                .get(&document_id)
                .map(|chunks| {
                    chunks
                        .iter()
                        .enumerate()
                        .take(top_k)
                        .map(|(i, content)| ContextSnippet {
                            content: content.clone(),
                            metadata: json!({ "document_id": document_id, "chunk_index": i }),
                            relevance_score: 1.0,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => self.context.iter().take(top_k).cloned().collect(),
        };
        Box::pin(async move { Ok(snippets) })
    }
}
