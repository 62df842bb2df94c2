use rusqlite::{params, OptionalExtension, Row};

use aiden_core::error::{AidenError, Result};
use aiden_core::types::Document;

use crate::store::*;

const COLUMNS: &str = "id, project_id, doc_type, filename, content, created_at";

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        project_id: row.get(1)?,
        doc_type: row.get(2)?,
        filename: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_ts(5, row.get(5)?)?,
    })
}

impl UnitOfWork<'_> {
    /// Store a document together with its index chunks.
    pub fn insert_document(&self, document: &Document, chunks: &[String]) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO documents (id, project_id, doc_type, filename, content, created_at, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                         (SELECT COALESCE(MAX(seq), 0) + 1 FROM documents))",
                params![
                    document.id,
                    document.project_id,
                    document.doc_type,
                    document.filename,
                    document.content,
                    ts(&document.created_at),
                ],
            )
            .map_err(db_err)?;

        let mut stmt = self
            .tx
            .prepare(
                "INSERT INTO document_chunks (document_id, project_id, doc_type, chunk_index, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(db_err)?;
        for (i, chunk) in chunks.iter().enumerate() {
            stmt.execute(params![
                document.id,
                document.project_id,
                document.doc_type,
                i as i64,
                chunk
            ])
            .map_err(db_err)?;
        }
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Document> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", COLUMNS),
                params![id],
                document_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| AidenError::not_found("Document", id))
    }

    /// Most recently uploaded document of a type.
    pub fn latest_document(&self, project_id: &str, doc_type: &str) -> Result<Option<Document>> {
        self.tx
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE project_id = ?1 AND doc_type = ?2
                     ORDER BY seq DESC LIMIT 1",
                    COLUMNS
                ),
                params![project_id, doc_type],
                document_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT {} FROM documents WHERE project_id = ?1 ORDER BY seq",
                COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![project_id], document_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
