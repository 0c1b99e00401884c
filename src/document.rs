//! The document lifecycle entity and its state machine.
//!
//! A [`Document`] is one uploaded artifact plus everything the pipeline has
//! learned about it so far. Its [`DocStatus`] only ever moves forward:
//!
//! ```text
//! uploaded ──▶ processing ──▶ calling_llm ──▶ extracted ──▶ saved
//!                   │               │
//!                   └───────────────┴────────▶ failed
//! ```
//!
//! `failed` and `saved` are terminal. The background task owns every
//! transition up to `extracted`; the save operation owns `saved`. Nothing
//! ever moves a document backwards, and nothing deletes one.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::invoice::ExtractedInvoice;

/// Lifecycle state of a document, stored as snake_case TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DocStatus {
    Uploaded,
    Processing,
    CallingLlm,
    Extracted,
    Saved,
    Failed,
}

impl DocStatus {
    /// Position along the forward-only lifecycle. `Failed` ranks alongside
    /// the terminal success states: nothing follows it.
    pub fn rank(self) -> u8 {
        match self {
            DocStatus::Uploaded => 0,
            DocStatus::Processing => 1,
            DocStatus::CallingLlm => 2,
            DocStatus::Extracted => 3,
            DocStatus::Saved => 4,
            DocStatus::Failed => 4,
        }
    }

    /// True once the background task has nothing further to do.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocStatus::Extracted | DocStatus::Saved | DocStatus::Failed)
    }

    /// The wire string, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            DocStatus::Uploaded => "uploaded",
            DocStatus::Processing => "processing",
            DocStatus::CallingLlm => "calling_llm",
            DocStatus::Extracted => "extracted",
            DocStatus::Saved => "saved",
            DocStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded artifact and its extraction lifecycle record.
///
/// Field invariants (enforced by [`crate::store::DocumentStore`]):
/// `error` is set iff status is `failed`; `extracted_json` is set iff status
/// is `extracted` or `saved`; `sales_order_id` is set at most once and never
/// cleared.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub content_type: String,
    /// Opaque handle into the blob store; the core never interprets it.
    pub storage_ref: String,
    pub status: DocStatus,
    pub error: Option<String>,
    pub extracted_json: Option<String>,
    pub sales_order_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

impl Document {
    /// Project the entity into the read-only status-query shape, parsing the
    /// stored extraction payload.
    ///
    /// A row whose `extracted_json` no longer parses yields `extracted:
    /// None` rather than an error — the column is written exclusively from
    /// serialized [`ExtractedInvoice`] values, so this only happens if the
    /// database was edited out-of-band.
    pub fn into_view(self) -> DocumentView {
        let extracted = self
            .extracted_json
            .as_deref()
            .and_then(|json| ExtractedInvoice::from_json(json).ok());
        DocumentView {
            id: self.id,
            filename: self.filename,
            status: self.status,
            error: self.error,
            extracted,
            sales_order_id: self.sales_order_id,
        }
    }
}

/// Read-only projection returned by the document status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentView {
    pub id: i64,
    pub filename: String,
    pub status: DocStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ExtractedInvoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sales_order_id: Option<i64>,
}
