use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use rusqlite::params;
use serde_json::json;
use tracing::debug;

use aiden_core::error::Result;
use aiden_core::traits::Retriever;
use aiden_core::types::{ContextSnippet, RetrievalFilter};

use crate::store::*;
use crate::Store;

/// Split text into chunks of roughly `chunk_size` characters, breaking on
/// blank lines first and on whitespace when a paragraph is too long.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut push_piece = |piece: &str, current: &mut String| {
        if !current.is_empty() && current.chars().count() + piece.chars().count() + 2 > chunk_size {
            chunks.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(piece);
    };

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() <= chunk_size {
            push_piece(paragraph, &mut current);
            continue;
        }
        let mut piece = String::new();
        for word in paragraph.split_whitespace() {
            if !piece.is_empty() && piece.chars().count() + word.chars().count() + 1 > chunk_size {
                push_piece(&piece, &mut current);
                piece.clear();
            }
            if !piece.is_empty() {
                piece.push(' ');
            }
            piece.push_str(word);
        }
        if !piece.is_empty() {
            push_piece(&piece, &mut current);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Turn free text into an FTS5 OR-query of quoted terms.
fn fts_query(query: &str) -> Option<String> {
    let terms: BTreeSet<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.into_iter().collect::<Vec<_>>().join(" OR "))
    }
}

impl UnitOfWork<'_> {
    /// All chunks of one document, in order, up to `limit`.
    pub fn document_chunks(
        &self,
        project_id: &str,
        document_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextSnippet>> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT document_id, chunk_index, doc_type, content FROM document_chunks
                 WHERE project_id = ?1 AND document_id = ?2
                 ORDER BY chunk_index LIMIT ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![project_id, document_id, limit as i64], |row| {
                let document_id: String = row.get(0)?;
                let chunk_index: i64 = row.get(1)?;
                let doc_type: String = row.get(2)?;
                Ok(ContextSnippet {
                    content: row.get(3)?,
                    metadata: json!({
                        "document_id": document_id,
                        "chunk_index": chunk_index,
                        "doc_type": doc_type,
                    }),
                    relevance_score: 1.0,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// BM25-ranked chunks of a project matching `query`.
    pub fn search_chunks(
        &self,
        project_id: &str,
        query: &str,
        doc_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ContextSnippet>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let mut stmt = self
            .tx
            .prepare(
                "SELECT c.document_id, c.chunk_index, c.doc_type, c.content, chunks_fts.rank
                 FROM chunks_fts JOIN document_chunks c ON c.id = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1 AND c.project_id = ?2
                   AND (?3 IS NULL OR c.doc_type = ?3)
                 ORDER BY chunks_fts.rank
                 LIMIT ?4",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![fts, project_id, doc_type, limit as i64], |row| {
                let document_id: String = row.get(0)?;
                let chunk_index: i64 = row.get(1)?;
                let doc_type: String = row.get(2)?;
                let rank: f64 = row.get(4)?;
                Ok(ContextSnippet {
                    content: row.get(3)?,
                    metadata: json!({
                        "document_id": document_id,
                        "chunk_index": chunk_index,
                        "doc_type": doc_type,
                    }),
                    // bm25 is negative, lower is better.
                    relevance_score: -rank,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

/// Full-text document index over the store's chunk table.
pub struct DocumentIndex {
    store: Arc<Store>,
}

impl DocumentIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl Retriever for DocumentIndex {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        project_id: &'a str,
        top_k: usize,
        filter: Option<RetrievalFilter>,
    ) -> BoxFuture<'a, Result<Vec<ContextSnippet>>> {
        Box::pin(async move {
            let filter = filter.unwrap_or_default();
            let snippets = self.store.unit_of_work(|uow| match &filter.document_id {
                Some(document_id) => uow.document_chunks(project_id, document_id, top_k),
                None => uow.search_chunks(project_id, query, filter.doc_type.as_deref(), top_k),
            })?;
            debug!(project_id, query, hits = snippets.len(), "Retrieved context");
            Ok(snippets)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seed_project;
    use aiden_core::types::{new_id, Document};
    use chrono::Utc;

    #[test]
    fn chunking_packs_paragraphs() {
        let text = "alpha beta\n\ngamma delta\n\nepsilon";
        let chunks = chunk_text(text, 25);
        assert_eq!(chunks, vec!["alpha beta\n\ngamma delta", "epsilon"]);
    }

    #[test]
    fn chunking_splits_long_paragraphs_on_words() {
        let text = "one two three four five six";
        let chunks = chunk_text(text, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.join(" ").replace("\n\n", " "), text);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("  \n\n ", 100).is_empty());
    }

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(fts_query("Login, SSO!").as_deref(), Some("\"login\" OR \"sso\""));
        assert!(fts_query("? !").is_none());
    }

    fn indexed_store() -> (Arc<Store>, String, String) {
        let store = Arc::new(Store::in_memory().unwrap());
        let (project, _) = seed_project(&store);
        let document = Document {
            id: new_id(),
            project_id: project.id.clone(),
            doc_type: "dev_request".into(),
            filename: "request.md".into(),
            content: String::new(),
            created_at: Utc::now(),
        };
        let chunks = vec![
            "Users must log in with single sign-on.".to_string(),
            "Invoices are exported nightly as CSV.".to_string(),
            "Admins can revoke user sessions.".to_string(),
        ];
        store
            .unit_of_work(|uow| uow.insert_document(&document, &chunks))
            .unwrap();
        (store, project.id, document.id)
    }

    #[tokio::test]
    async fn document_filter_returns_chunks_in_order() {
        let (store, project_id, document_id) = indexed_store();
        let index = DocumentIndex::new(store);
        let filter = RetrievalFilter {
            document_id: Some(document_id.clone()),
            doc_type: None,
        };
        let snippets = index.retrieve("", &project_id, 50, Some(filter)).await.unwrap();
        assert_eq!(snippets.len(), 3);
        assert!(snippets[0].content.starts_with("Users must"));
        assert_eq!(snippets[2].metadata["chunk_index"], 2);
    }

    #[tokio::test]
    async fn search_ranks_matching_chunks() {
        let (store, project_id, _) = indexed_store();
        let index = DocumentIndex::new(store);
        let snippets = index.retrieve("invoices export", &project_id, 5, None).await.unwrap();
        assert!(!snippets.is_empty());
        assert!(snippets[0].content.contains("Invoices"));
        assert!(snippets[0].relevance_score > 0.0);

        let other = index.retrieve("invoices", "other-project", 5, None).await.unwrap();
        assert!(other.is_empty());
    }
}
