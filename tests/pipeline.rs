//! End-to-end pipeline tests.
//!
//! These drive the full document lifecycle — ingest, background task,
//! events, save — against a temp-dir SQLite database, a temp-dir blob
//! store, and a scripted extractor, so no API key, network access, or
//! pdfium library is needed.
//!
//! Document ids are SQLite AUTOINCREMENT values, so the first document in a
//! fresh database is always id 1; tests exploit that to subscribe to the
//! event stream *before* ingesting and observe the full event sequence
//! without races.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doc2order::{
    db, DocEvent, DocStatus, Doc2OrderError, DocumentView, ExtractError, ExtractedInvoice,
    FsBlobStore, InvoiceExtractor, InvoicePipeline, LineItem, PipelineConfig, Subscription,
};
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::json;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// A 4×4 red PNG — enough for the normalization stage to accept.
fn tiny_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([220, 30, 30])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn sample_invoice() -> ExtractedInvoice {
    ExtractedInvoice {
        invoice_number: Some("SO-1".into()),
        subtotal: Some(20.0),
        tax_amt: Some(1.0),
        freight: Some(0.0),
        total_due: Some(21.0),
        items: vec![LineItem {
            item_number: None,
            description: "Widget".into(),
            qty: 2.0,
            unit_price: 10.0,
            line_total: 20.0,
        }],
        ..Default::default()
    }
}

enum Script {
    Succeed(ExtractedInvoice),
    Fail(String),
}

/// Extractor standing in for the vision provider: replays a script and
/// counts invocations.
struct ScriptedExtractor {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    fn succeeding(invoice: ExtractedInvoice) -> Arc<Self> {
        Arc::new(Self {
            script: Script::Succeed(invoice),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::Fail(message.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InvoiceExtractor for ScriptedExtractor {
    async fn extract(&self, png: &[u8]) -> Result<ExtractedInvoice, ExtractError> {
        assert!(!png.is_empty(), "extractor must receive normalized bytes");
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Succeed(invoice) => Ok(invoice.clone()),
            Script::Fail(message) => Err(ExtractError::Provider {
                detail: message.clone(),
            }),
        }
    }
}

async fn pipeline_with(
    extractor: Arc<dyn InvoiceExtractor>,
) -> (tempfile::TempDir, InvoicePipeline) {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder()
        .db_path(dir.path().join("t.db"))
        .upload_dir(dir.path().join("uploads"))
        .build()
        .unwrap();
    let pool = db::connect(&config.db_path).await.unwrap();
    let blobs = Arc::new(FsBlobStore::new(&config.upload_dir));
    let pipeline = InvoicePipeline::from_parts(config, pool, blobs, extractor);
    (dir, pipeline)
}

/// Receive the next event or fail loudly after 5 seconds.
async fn next_event(sub: &mut Subscription) -> DocEvent {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed unexpectedly")
}

/// Poll the status projection until the document reaches `expected`.
async fn wait_for_status(
    pipeline: &InvoicePipeline,
    doc_id: i64,
    expected: DocStatus,
) -> DocumentView {
    for _ in 0..500 {
        let view = pipeline.document(doc_id).await.unwrap();
        if view.status == expected {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("document {doc_id} never reached {expected}");
}

fn status_of(event: &DocEvent) -> Option<&str> {
    match event {
        DocEvent::Status { status } => Some(status.as_str()),
        _ => None,
    }
}

// ── Extraction lifecycle ─────────────────────────────────────────────────────

#[tokio::test]
async fn successful_extraction_publishes_events_in_order() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    // First document in a fresh database is id 1: subscribe ahead of time.
    let mut sub = pipeline.subscribe(1);
    let doc_id = pipeline
        .ingest("invoice.png", "image/png", tiny_png())
        .await
        .unwrap();
    assert_eq!(doc_id, 1);

    assert_eq!(status_of(&next_event(&mut sub).await), Some("processing"));
    assert_eq!(status_of(&next_event(&mut sub).await), Some("calling_llm"));

    // Payload event first, status second — exactly once each.
    match next_event(&mut sub).await {
        DocEvent::Extracted { data } => assert_eq!(data, sample_invoice()),
        other => panic!("expected the extracted payload, got {other:?}"),
    }
    assert_eq!(status_of(&next_event(&mut sub).await), Some("extracted"));

    let view = wait_for_status(&pipeline, doc_id, DocStatus::Extracted).await;
    assert_eq!(view.extracted, Some(sample_invoice()));
    assert!(view.error.is_none());
    assert!(view.sales_order_id.is_none());

    pipeline.close().await;
}

#[tokio::test]
async fn invalid_bytes_fail_with_an_error_event() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let mut sub = pipeline.subscribe(1);
    let doc_id = pipeline
        .ingest("broken.png", "image/png", b"these are not pixels".to_vec())
        .await
        .unwrap();

    assert_eq!(status_of(&next_event(&mut sub).await), Some("processing"));
    match next_event(&mut sub).await {
        DocEvent::Error { message } => assert!(!message.is_empty()),
        other => panic!("expected an error event, got {other:?}"),
    }

    let view = wait_for_status(&pipeline, doc_id, DocStatus::Failed).await;
    assert!(view.error.as_deref().is_some_and(|e| !e.is_empty()));
    assert!(view.extracted.is_none(), "failed documents hold no payload");

    pipeline.close().await;
}

#[tokio::test]
async fn provider_failure_marks_the_document_failed() {
    let extractor = ScriptedExtractor::failing("model refused the image");
    let (_dir, pipeline) = pipeline_with(extractor.clone()).await;

    let mut sub = pipeline.subscribe(1);
    let doc_id = pipeline
        .ingest("invoice.png", "image/png", tiny_png())
        .await
        .unwrap();

    assert_eq!(status_of(&next_event(&mut sub).await), Some("processing"));
    assert_eq!(status_of(&next_event(&mut sub).await), Some("calling_llm"));
    match next_event(&mut sub).await {
        DocEvent::Error { message } => assert!(message.contains("model refused the image")),
        other => panic!("expected an error event, got {other:?}"),
    }

    let view = wait_for_status(&pipeline, doc_id, DocStatus::Failed).await;
    assert!(view.error.unwrap().contains("model refused the image"));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    pipeline.close().await;
}

#[tokio::test]
async fn concurrent_documents_keep_their_event_streams_apart() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let mut sub_one = pipeline.subscribe(1);
    let mut sub_two = pipeline.subscribe(2);

    let first = pipeline
        .ingest("a.png", "image/png", tiny_png())
        .await
        .unwrap();
    let second = pipeline
        .ingest("b.png", "image/png", tiny_png())
        .await
        .unwrap();
    assert_eq!((first, second), (1, 2));

    wait_for_status(&pipeline, first, DocStatus::Extracted).await;
    wait_for_status(&pipeline, second, DocStatus::Extracted).await;

    // Each observer saw its own document's full sequence — and nothing else.
    for sub in [&mut sub_one, &mut sub_two] {
        assert_eq!(status_of(&next_event(sub).await), Some("processing"));
        assert_eq!(status_of(&next_event(sub).await), Some("calling_llm"));
        assert!(matches!(next_event(sub).await, DocEvent::Extracted { .. }));
        assert_eq!(status_of(&next_event(sub).await), Some("extracted"));
    }

    pipeline.close().await;
}

#[tokio::test]
async fn watch_stream_greets_with_connected() {
    use tokio_stream::StreamExt;

    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let mut events = pipeline.watch(1);
    let greeting = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(greeting, DocEvent::connected());

    pipeline
        .ingest("invoice.png", "image/png", tiny_png())
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status_of(&first), Some("processing"));

    pipeline.close().await;
}

// ── Admission checks ─────────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_uploads_are_rejected_before_any_side_effect() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder()
        .db_path(dir.path().join("t.db"))
        .upload_dir(dir.path().join("uploads"))
        .max_upload_bytes(16)
        .build()
        .unwrap();
    let pool = db::connect(&config.db_path).await.unwrap();
    let blobs = Arc::new(FsBlobStore::new(&config.upload_dir));
    let pipeline = InvoicePipeline::from_parts(
        config,
        pool,
        blobs,
        ScriptedExtractor::succeeding(sample_invoice()),
    );

    let err = pipeline
        .ingest("big.png", "image/png", vec![0u8; 64])
        .await
        .unwrap_err();
    assert!(matches!(err, Doc2OrderError::TooLarge { size: 64, .. }));

    // No document was created.
    assert!(matches!(
        pipeline.document(1).await,
        Err(Doc2OrderError::NotFound { .. })
    ));

    pipeline.close().await;
}

#[tokio::test]
async fn non_document_content_types_are_rejected_at_ingest() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let err = pipeline
        .ingest("notes.txt", "text/plain", b"hello".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, Doc2OrderError::UnsupportedInput { .. }));

    // Magic bytes outrank the declared type: a real PDF mislabelled as text
    // is still admitted.
    let ok = pipeline
        .ingest("real.pdf", "text/plain", b"%PDF-1.7 stub".to_vec())
        .await;
    assert!(ok.is_ok());

    pipeline.close().await;
}

#[tokio::test]
async fn unknown_document_ids_are_not_found() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;
    assert!(matches!(
        pipeline.document(999).await,
        Err(Doc2OrderError::NotFound {
            what: "document",
            id: 999
        })
    ));
    pipeline.close().await;
}

// ── Save / confirm ───────────────────────────────────────────────────────────

fn two_item_payload() -> serde_json::Value {
    json!({
        "invoice_number": "SO-77",
        "order_date": "2024-03-01",
        "subtotal": 50.0,
        "total_due": 55.0,
        "items": [
            {"description": "Widget", "qty": 2, "unit_price": 10.0, "line_total": 20.0},
            {"description": "Gadget", "qty": 3, "unit_price": 10.0, "line_total": 30.0}
        ]
    })
}

#[tokio::test]
async fn save_commits_the_order_and_links_the_document() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let doc_id = pipeline
        .ingest("invoice.png", "image/png", tiny_png())
        .await
        .unwrap();
    wait_for_status(&pipeline, doc_id, DocStatus::Extracted).await;

    let order_id = pipeline.save(doc_id, two_item_payload()).await.unwrap();

    let order = pipeline.order(order_id).await.unwrap();
    assert_eq!(order.header.sales_order_number.as_deref(), Some("SO-77"));
    assert_eq!(order.details.len(), 2);
    assert!(order.details.iter().all(|d| d.sales_order_id == order_id));

    let view = pipeline.document(doc_id).await.unwrap();
    assert_eq!(view.status, DocStatus::Saved);
    assert_eq!(view.sales_order_id, Some(order_id));
    // The saved payload replaced the extraction wholesale.
    assert_eq!(
        view.extracted.unwrap().invoice_number.as_deref(),
        Some("SO-77")
    );

    pipeline.close().await;
}

#[tokio::test]
async fn saving_twice_creates_two_orders_and_keeps_the_second_link() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let doc_id = pipeline
        .ingest("invoice.png", "image/png", tiny_png())
        .await
        .unwrap();
    wait_for_status(&pipeline, doc_id, DocStatus::Extracted).await;

    let first = pipeline.save(doc_id, two_item_payload()).await.unwrap();
    let second = pipeline.save(doc_id, two_item_payload()).await.unwrap();

    assert_ne!(first, second, "each save commits a fresh order");
    let view = pipeline.document(doc_id).await.unwrap();
    assert_eq!(view.sales_order_id, Some(second));

    // Both aggregates exist in full.
    assert_eq!(pipeline.order(first).await.unwrap().details.len(), 2);
    assert_eq!(pipeline.order(second).await.unwrap().details.len(), 2);

    pipeline.close().await;
}

#[tokio::test]
async fn malformed_payloads_are_rejected_without_touching_anything() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;

    let doc_id = pipeline
        .ingest("invoice.png", "image/png", tiny_png())
        .await
        .unwrap();
    wait_for_status(&pipeline, doc_id, DocStatus::Extracted).await;

    // Line item missing qty → shape validation fails.
    let bad = json!({
        "invoice_number": "SO-88",
        "items": [{"description": "Widget", "unit_price": 10.0, "line_total": 20.0}]
    });
    let err = pipeline.save(doc_id, bad).await.unwrap_err();
    assert!(matches!(err, Doc2OrderError::Validation { .. }));

    // Document state unchanged, no order created.
    let view = pipeline.document(doc_id).await.unwrap();
    assert_eq!(view.status, DocStatus::Extracted);
    assert_eq!(view.extracted, Some(sample_invoice()));
    assert!(view.sales_order_id.is_none());
    assert!(pipeline.list_orders(10).await.unwrap().is_empty());

    pipeline.close().await;
}

#[tokio::test]
async fn save_on_an_unknown_document_is_not_found() {
    let (_dir, pipeline) = pipeline_with(ScriptedExtractor::succeeding(sample_invoice())).await;
    let err = pipeline.save(404, two_item_payload()).await.unwrap_err();
    assert!(matches!(
        err,
        Doc2OrderError::NotFound {
            what: "document",
            ..
        }
    ));
    pipeline.close().await;
}
