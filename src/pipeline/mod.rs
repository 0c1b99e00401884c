//! Pipeline stages between raw upload bytes and a structured invoice.
//!
//! Each submodule implements exactly one transformation step, independently
//! testable and swappable without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! normalize ──▶ encode ──▶ extract
//! (bytes→PNG)  (base64)   (vision LLM → ExtractedInvoice)
//! ```
//!
//! 1. [`normalize`] — canonicalise an uploaded image or PDF into a single
//!    PNG; pdfium work runs in `spawn_blocking` because it is not async-safe
//! 2. [`encode`]    — base64-wrap the PNG for the multimodal request body
//! 3. [`extract`]   — the [`extract::InvoiceExtractor`] port and its
//!    vision-LLM implementation; the only stage with network I/O

pub mod encode;
pub mod extract;
pub mod normalize;
