//! The pipeline orchestrator: one state machine per document, one background
//! task per upload.
//!
//! ## Lifecycle
//!
//! ```text
//! ingest()            spawned task                              save()
//!    │                     │                                      │
//!    ├─ cap + type check   ├─ processing   (persist + publish)    ├─ validate payload
//!    ├─ store bytes        ├─ normalize → PNG                     ├─ persist extracted
//!    ├─ create row         ├─ calling_llm (persist + publish)     ├─ commit order aggregate
//!    └─ spawn task ──────▶ ├─ extract → record                    └─ mark saved
//!                          └─ extracted  (persist, publish
//!                                         extracted then status)
//! ```
//!
//! The task communicates with the rest of the system exclusively through the
//! document store and the event bus — no shared mutable state with its
//! caller. Every failure inside the task is captured into the document's
//! `error` field and an `error` event; nothing propagates out, and the task
//! always terminates cleanly.
//!
//! `ingest` fires the task exactly once, at document creation. Nothing
//! restarts it: a failed document stays failed (re-upload to retry), which
//! keeps "one invocation per document" a structural property instead of a
//! runtime check.

use std::sync::Arc;

use futures::{stream, StreamExt};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::db;
use crate::document::{DocStatus, DocumentView};
use crate::error::Doc2OrderError;
use crate::events::{DocEvent, DocEventStream, EventBus, Subscription};
use crate::invoice::ExtractedInvoice;
use crate::orders::{OrderHeader, OrderWriter, SalesOrder};
use crate::pipeline::{extract, normalize};
use crate::storage::{BlobStore, FsBlobStore};
use crate::store::DocumentStore;

/// The document-to-order pipeline with all of its collaborators.
///
/// Construct once at startup ([`InvoicePipeline::new`]) and clone freely —
/// clones share the pool, the blob store, the event bus, and the extractor.
/// Call [`close`](Self::close) at shutdown to drain the database pool.
#[derive(Clone)]
pub struct InvoicePipeline {
    config: Arc<PipelineConfig>,
    pool: SqlitePool,
    store: DocumentStore,
    orders: OrderWriter,
    blobs: Arc<dyn BlobStore>,
    bus: EventBus,
    extractor: Arc<dyn extract::InvoiceExtractor>,
}

impl InvoicePipeline {
    /// Open the database, the upload directory, and the extraction provider
    /// described by `config`.
    ///
    /// Provider resolution happens here rather than lazily so a
    /// misconfigured environment fails at startup, not on the first upload.
    pub async fn new(config: PipelineConfig) -> Result<Self, Doc2OrderError> {
        let extractor = extract::resolve_extractor(&config)?;
        let pool = db::connect(&config.db_path).await?;
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.upload_dir));
        Ok(Self::from_parts(config, pool, blobs, extractor))
    }

    /// Assemble a pipeline from pre-built collaborators.
    ///
    /// This is the dependency-injection seam: tests pass a scripted
    /// extractor and a temp-dir pool through here.
    pub fn from_parts(
        config: PipelineConfig,
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn extract::InvoiceExtractor>,
    ) -> Self {
        let bus = EventBus::new(config.event_buffer);
        InvoicePipeline {
            store: DocumentStore::new(pool.clone()),
            orders: OrderWriter::new(pool.clone()),
            config: Arc::new(config),
            pool,
            blobs,
            bus,
            extractor,
        }
    }

    /// Close the database pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Ingestion ─────────────────────────────────────────────────────────

    /// Accept an upload: store the bytes, create the document in `uploaded`,
    /// and fire its background task. Returns the new document id
    /// immediately; progress arrives via [`watch`](Self::watch) or the
    /// status query.
    pub async fn ingest(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<i64, Doc2OrderError> {
        if bytes.len() > self.config.max_upload_bytes {
            return Err(Doc2OrderError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_upload_bytes,
            });
        }
        // Admission check: reject obvious non-documents before paying for
        // storage. Magic bytes beat the declared type.
        if !normalize::is_pdf(&bytes, content_type) && !content_type.starts_with("image/") {
            return Err(Doc2OrderError::UnsupportedInput {
                detail: format!("content type '{content_type}'"),
            });
        }

        let storage_ref = self.blobs.save(filename, &bytes).await?;
        let doc = self.store.create(filename, content_type, &storage_ref).await?;
        info!(doc_id = doc.id, filename, content_type, "document ingested");

        tokio::spawn(self.clone().run_document(doc.id));
        Ok(doc.id)
    }

    /// Fetch a remote document and ingest it. The content type comes from
    /// the response headers, the filename from the final URL path segment.
    pub async fn ingest_url(&self, url: &str) -> Result<i64, Doc2OrderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.download_timeout_secs))
            .build()
            .map_err(|e| Doc2OrderError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Doc2OrderError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Doc2OrderError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let filename = filename_from_url(url);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Doc2OrderError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        self.ingest(&filename, &content_type, bytes.to_vec()).await
    }

    // ── The background task ───────────────────────────────────────────────

    /// One run per document, started exactly once at creation. Never
    /// returns an error: every failure lands in the document row and the
    /// event stream instead.
    async fn run_document(self, doc_id: i64) {
        let doc = match self.store.get(doc_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(doc_id, "document vanished before processing started");
                return;
            }
            Err(e) => {
                error!(doc_id, "could not load document for processing: {e}");
                return;
            }
        };

        if !self.advance(doc_id, DocStatus::Processing).await {
            return;
        }

        let raw = match self.blobs.read(&doc.storage_ref).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(doc_id, &e.to_string()).await,
        };

        let png =
            match normalize::normalize_to_png(raw, &doc.content_type, self.config.max_pixels).await
            {
                Ok(png) => png,
                Err(e) => return self.fail(doc_id, &e.to_string()).await,
            };

        if !self.advance(doc_id, DocStatus::CallingLlm).await {
            return;
        }

        let extracted = match self.extractor.extract(&png).await {
            Ok(extracted) => extracted,
            Err(e) => return self.fail(doc_id, &e.to_string()).await,
        };

        match self.store.set_extracted(doc_id, &extracted).await {
            Ok(()) => {
                // Payload first, then the status that says it is complete —
                // an observer that reacts to `extracted` status can fetch
                // the record it just saw.
                self.bus.publish(doc_id, &DocEvent::Extracted { data: extracted });
                self.bus.publish(doc_id, &DocEvent::status(DocStatus::Extracted));
                info!(doc_id, "extraction complete");
            }
            Err(e) => error!(doc_id, "could not persist extraction result: {e}"),
        }
    }

    /// Persist a forward transition and publish its status event. Returns
    /// false (after logging) if the database write failed, which aborts the
    /// task rather than continuing with observers out of sync.
    async fn advance(&self, doc_id: i64, status: DocStatus) -> bool {
        match self.store.set_status(doc_id, status).await {
            Ok(()) => {
                self.bus.publish(doc_id, &DocEvent::status(status));
                true
            }
            Err(e) => {
                error!(doc_id, %status, "could not persist status transition: {e}");
                false
            }
        }
    }

    /// Terminal failure: capture the message on the row, broadcast it, done.
    async fn fail(&self, doc_id: i64, message: &str) {
        warn!(doc_id, message, "document failed");
        if let Err(e) = self.store.mark_failed(doc_id, message).await {
            error!(doc_id, "could not persist failure: {e}");
        }
        self.bus.publish(doc_id, &DocEvent::error(message));
    }

    // ── Save / confirm ────────────────────────────────────────────────────

    /// Persist a caller-supplied (possibly edited) invoice payload and
    /// materialise the order aggregate from it. Runs synchronously to
    /// completion and returns the new order id.
    ///
    /// The payload replaces the document's extracted value wholesale,
    /// regardless of current status. Deliberately not idempotent: calling
    /// twice commits two orders, and the document ends up linked to the
    /// second.
    pub async fn save(
        &self,
        doc_id: i64,
        payload: serde_json::Value,
    ) -> Result<i64, Doc2OrderError> {
        let extracted = ExtractedInvoice::from_value(payload)?;
        self.store.require(doc_id).await?;

        self.store.set_extracted(doc_id, &extracted).await?;
        let order_id = self.orders.create_order(&extracted).await?;
        self.store.mark_saved(doc_id, order_id).await?;

        info!(doc_id, order_id, "document saved as sales order");
        Ok(order_id)
    }

    // ── Queries & observation ─────────────────────────────────────────────

    /// Read-only projection of one document's lifecycle state.
    pub async fn document(&self, doc_id: i64) -> Result<DocumentView, Doc2OrderError> {
        Ok(self.store.require(doc_id).await?.into_view())
    }

    /// Register a live observer for one document's events.
    pub fn subscribe(&self, doc_id: i64) -> Subscription {
        self.bus.subscribe(doc_id)
    }

    /// An observer stream that greets with the synthetic `connected` status
    /// event, then relays bus events until dropped. Dropping the stream
    /// unsubscribes.
    pub fn watch(&self, doc_id: i64) -> DocEventStream {
        let subscription = self.bus.subscribe(doc_id);
        Box::pin(stream::once(async { DocEvent::connected() }).chain(subscription))
    }

    /// Newest-first order header summaries.
    pub async fn list_orders(&self, limit: i64) -> Result<Vec<OrderHeader>, Doc2OrderError> {
        self.orders.list_orders(limit).await
    }

    /// One full order aggregate.
    pub async fn order(&self, order_id: i64) -> Result<SalesOrder, Doc2OrderError> {
        self.orders.get_order(order_id).await
    }
}

/// Last path segment of the URL, or a generic name when there is none.
fn filename_from_url(url: &str) -> String {
    url.split('/')
        .next_back()
        .map(|s| s.split(['?', '#']).next().unwrap_or(s))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "downloaded".to_string())
}
