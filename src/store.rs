//! DocumentStore: the persistence boundary for a document's lifecycle
//! fields.
//!
//! Every mutation here is a single SQL statement, so a concurrent reader
//! (the status query) always observes a fully-written row — there is no
//! intermediate state in which, say, `status = 'failed'` is visible while
//! `error` is still NULL. The two invariant-bearing writes keep the
//! exclusivity rule mechanical: failing a document clears any extraction
//! payload, and recording a payload clears any error.

use sqlx::SqlitePool;
use tracing::debug;

use crate::document::{DocStatus, Document};
use crate::error::Doc2OrderError;
use crate::invoice::ExtractedInvoice;

const DOC_COLUMNS: &str =
    "id, filename, content_type, storage_ref, status, error, extracted_json, sales_order_id, created_at";

/// Lifecycle CRUD over an injected pool. Cheap to clone.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        DocumentStore { pool }
    }

    /// Create a document in status `uploaded`. The status is assigned in the
    /// same INSERT as the identity, so no observer can see a document
    /// without one.
    pub async fn create(
        &self,
        filename: &str,
        content_type: &str,
        storage_ref: &str,
    ) -> Result<Document, Doc2OrderError> {
        let doc = sqlx::query_as::<_, Document>(&format!(
            "INSERT INTO documents (filename, content_type, storage_ref, status) \
             VALUES (?, ?, ?, 'uploaded') RETURNING {DOC_COLUMNS}"
        ))
        .bind(filename)
        .bind(content_type)
        .bind(storage_ref)
        .fetch_one(&self.pool)
        .await?;
        debug!(doc_id = doc.id, filename, "document created");
        Ok(doc)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Document>, Doc2OrderError> {
        let doc = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    /// Like [`get`](Self::get) but with unknown ids as a typed error.
    pub async fn require(&self, id: i64) -> Result<Document, Doc2OrderError> {
        self.get(id).await?.ok_or(Doc2OrderError::NotFound {
            what: "document",
            id,
        })
    }

    /// Advance the lifecycle status.
    pub async fn set_status(&self, id: i64, status: DocStatus) -> Result<(), Doc2OrderError> {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(doc_id = id, status = %status, "document status advanced");
        Ok(())
    }

    /// Terminal failure: status `failed` plus the error text, and any stale
    /// extraction payload cleared so `error`/`extracted` stay mutually
    /// exclusive.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), Doc2OrderError> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error = ?, extracted_json = NULL WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        debug!(doc_id = id, error, "document failed");
        Ok(())
    }

    /// Record the extraction payload and move to `extracted`, clearing any
    /// error text.
    pub async fn set_extracted(
        &self,
        id: i64,
        extracted: &ExtractedInvoice,
    ) -> Result<(), Doc2OrderError> {
        let json = serde_json::to_string(extracted)
            .map_err(|e| Doc2OrderError::Internal(format!("serialize extraction: {e}")))?;
        sqlx::query(
            "UPDATE documents SET status = 'extracted', extracted_json = ?, error = NULL WHERE id = ?",
        )
        .bind(json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link the document to its order and move to the terminal `saved`
    /// state.
    pub async fn mark_saved(&self, id: i64, sales_order_id: i64) -> Result<(), Doc2OrderError> {
        sqlx::query("UPDATE documents SET status = 'saved', sales_order_id = ? WHERE id = ?")
            .bind(sales_order_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(doc_id = id, sales_order_id, "document saved");
        Ok(())
    }
}
