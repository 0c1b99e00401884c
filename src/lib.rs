//! # doc2order
//!
//! Turn invoice documents (images and PDFs) into structured sales orders
//! using Vision Language Models.
//!
//! ## Why this crate?
//!
//! Invoice data entry is transcription work: read a page, key the fields,
//! key the line items, file the order. This crate automates the loop — a
//! vision model reads the page like a human would — while keeping a person
//! in charge of the only step that matters: confirming (and correcting) the
//! extraction before an order is committed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Ingest     store raw bytes, create the document, spawn its task
//!  ├─ 2. Normalize  image/PDF page 1 → canonical PNG (pdfium, spawn_blocking)
//!  ├─ 3. Extract    vision LLM → structured invoice record
//!  ├─ 4. Observe    per-document event stream: status / extracted / error
//!  └─ 5. Save       user-confirmed payload → order header + detail rows
//! ```
//!
//! Each document moves through `uploaded → processing → calling_llm →
//! {extracted | failed}`, with a final user-triggered `saved`. One background
//! task drives each document; live observers subscribe by document id and
//! receive progress events without polling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2order::{InvoicePipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let pipeline = InvoicePipeline::new(PipelineConfig::default()).await?;
//!
//!     let bytes = std::fs::read("invoice.png")?;
//!     let doc_id = pipeline.ingest("invoice.png", "image/png", bytes).await?;
//!
//!     // Watch extraction progress live…
//!     use futures::StreamExt;
//!     let mut events = pipeline.watch(doc_id);
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!
//!     // …or poll the status projection.
//!     let view = pipeline.document(doc_id).await?;
//!     println!("status: {}", view.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2order` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding only the library:
//! ```toml
//! doc2order = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod events;
pub mod ingest;
pub mod invoice;
pub mod orders;
pub mod pipeline;
pub mod prompts;
pub mod storage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use document::{DocStatus, Document, DocumentView};
pub use error::{Doc2OrderError, ExtractError};
pub use events::{DocEvent, DocEventStream, EventBus, Subscription};
pub use ingest::InvoicePipeline;
pub use invoice::{ExtractedInvoice, LineItem};
pub use orders::{OrderDetail, OrderHeader, OrderWriter, SalesOrder};
pub use pipeline::extract::InvoiceExtractor;
pub use storage::{BlobStore, FsBlobStore};
pub use store::DocumentStore;
