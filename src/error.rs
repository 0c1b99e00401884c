//! Error types for the doc2order library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2OrderError`] — **Caller-facing**: an operation invoked by the
//!   caller (ingest, save, status query) cannot proceed. Returned as
//!   `Err(Doc2OrderError)` from the [`crate::ingest::InvoicePipeline`]
//!   methods.
//!
//! * [`ExtractError`] — **Extraction-port level**: the vision provider could
//!   not produce a conforming invoice record. It keeps "the call failed" and
//!   "the reply did not match the schema" apart for diagnostics, but inside
//!   the background task both end the same way: the document transitions to
//!   `failed` and the message lands in its `error` field.
//!
//! Background-task failures never surface as a `Result` anywhere — the task
//! captures them into the document row and the event stream and terminates
//! cleanly.

use std::path::PathBuf;
use thiserror::Error;

/// All caller-facing errors returned by the doc2order library.
#[derive(Debug, Error)]
pub enum Doc2OrderError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded bytes are neither a PDF nor a decodable raster image.
    #[error("Unsupported document: {detail}\nUpload a PDF or an image file (PNG, JPEG, GIF, WEBP, TIFF, BMP).")]
    UnsupportedInput { detail: String },

    /// Upload exceeds the configured size cap.
    #[error("Document too large: {size} bytes (limit {limit} bytes)\nRaise max_upload_bytes if this is intentional.")]
    TooLarge { size: usize, limit: usize },

    /// HTTP fetch of a remote document failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The extraction port failed (provider call or schema mismatch).
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// No vision provider could be resolved from config or environment.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Save errors ───────────────────────────────────────────────────────
    /// A caller-supplied save payload does not match the invoice shape.
    #[error("Invalid invoice payload: {detail}")]
    Validation { detail: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// An operation referenced a document or order id that does not exist.
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: i64 },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// Blob storage could not save or read document bytes.
    #[error("Storage error for '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the extraction port could not produce an invoice record.
///
/// The pipeline treats both variants identically (document → `failed`); the
/// split exists so logs and the document's `error` field say *which* side of
/// the provider boundary broke.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The provider call itself failed: transport error, auth, rate limit,
    /// or an explicit refusal to process the image.
    #[error("extraction provider error: {detail}")]
    Provider { detail: String },

    /// The provider answered, but the reply could not be parsed into the
    /// invoice record shape.
    #[error("extraction returned malformed data: {detail}")]
    Schema { detail: String },
}
