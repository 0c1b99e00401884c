//! Per-document progress events and the in-memory bus that fans them out.
//!
//! ## Delivery contract
//!
//! The bus is transient and best-effort by design: events go only to
//! channels registered *right now* under the published document id. A full
//! or disconnected channel is skipped silently — a slow observer misses
//! events rather than slowing the pipeline down — and publishing with zero
//! subscribers simply discards the event. There is no replay and no
//! buffering beyond each subscriber's own bounded channel.
//!
//! Per-channel delivery preserves publish order; nothing is ordered across
//! documents.
//!
//! ## Why a single mutex over the registry?
//!
//! The subscriber registry is the one structure mutated concurrently from
//! arbitrary tasks (subscribe on connection open, unsubscribe on drop,
//! publish from every document task). Encapsulating it behind the bus's own
//! `Mutex<HashMap<..>>` keeps every mutation atomic — no caller ever
//! iterates a half-modified subscriber set. The critical sections are a few
//! pointer moves and `try_send` calls, so contention is irrelevant next to
//! the network and database work around it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::document::DocStatus;
use crate::invoice::ExtractedInvoice;

/// Synthetic status string emitted when an observer stream opens.
pub const CONNECTED: &str = "connected";

/// A progress notification for one document.
///
/// Serialized with a `type` tag so the wire shape is
/// `{"type":"status","status":"processing"}`,
/// `{"type":"extracted","data":{…}}` or
/// `{"type":"error","message":"…"}`. `status` is a string rather than
/// [`DocStatus`] because observer streams open with the synthetic
/// [`CONNECTED`] greeting, which is not a lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocEvent {
    Status { status: String },
    Extracted { data: ExtractedInvoice },
    Error { message: String },
}

impl DocEvent {
    /// A lifecycle-status event.
    pub fn status(status: DocStatus) -> Self {
        DocEvent::Status {
            status: status.as_str().to_string(),
        }
    }

    /// The greeting an observer stream emits on open.
    pub fn connected() -> Self {
        DocEvent::Status {
            status: CONNECTED.to_string(),
        }
    }

    /// An error event carrying the document's failure text.
    pub fn error(message: impl Into<String>) -> Self {
        DocEvent::Error {
            message: message.into(),
        }
    }
}

struct Channel {
    token: u64,
    tx: mpsc::Sender<DocEvent>,
}

struct BusInner {
    capacity: usize,
    next_token: AtomicU64,
    channels: Mutex<HashMap<i64, Vec<Channel>>>,
}

/// In-memory multiplexer from document id to currently-connected observers.
///
/// Cheap to clone (all clones share one registry); hand a clone to anything
/// that needs to publish or subscribe.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose subscriber channels buffer `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                next_token: AtomicU64::new(0),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a fresh observer channel for `doc_id`.
    ///
    /// Returns immediately and never fails; the returned [`Subscription`]
    /// unsubscribes itself when dropped.
    pub fn subscribe(&self, doc_id: i64) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .lock()
            .expect("event bus lock poisoned")
            .entry(doc_id)
            .or_default()
            .push(Channel { token, tx });
        trace!(doc_id, token, "event subscription registered");
        Subscription {
            doc_id,
            token,
            bus: self.clone(),
            rx,
        }
    }

    /// Deliver `event` to every channel currently registered under `doc_id`.
    ///
    /// Non-blocking: a channel whose buffer is full is skipped, a channel
    /// whose receiver has gone away is pruned, and with no subscribers the
    /// event is dropped on the floor.
    pub fn publish(&self, doc_id: i64, event: &DocEvent) {
        let mut channels = self.inner.channels.lock().expect("event bus lock poisoned");
        let Some(list) = channels.get_mut(&doc_id) else {
            return;
        };
        list.retain(|ch| match ch.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(doc_id, token = ch.token, "subscriber buffer full, event skipped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            channels.remove(&doc_id);
        }
    }

    /// Remove one channel's registration. Idempotent: removing a channel
    /// that is already gone is a no-op. The map entry for `doc_id` is
    /// reclaimed once its last channel goes.
    pub fn unsubscribe(&self, doc_id: i64, token: u64) {
        let mut channels = self.inner.channels.lock().expect("event bus lock poisoned");
        if let Some(list) = channels.get_mut(&doc_id) {
            list.retain(|ch| ch.token != token);
            if list.is_empty() {
                channels.remove(&doc_id);
            }
        }
    }

    /// Number of channels currently registered under `doc_id`.
    pub fn subscriber_count(&self, doc_id: i64) -> usize {
        self.inner
            .channels
            .lock()
            .expect("event bus lock poisoned")
            .get(&doc_id)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    /// A bus with the default per-subscriber buffer of 32 events.
    fn default() -> Self {
        EventBus::new(32)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.inner.channels.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("documents", &channels.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// One observer's registration: the receiving half of a bounded channel.
///
/// Dropping the subscription unregisters it — the delivery layer does not
/// need a separate cleanup step when the remote side disconnects.
pub struct Subscription {
    doc_id: i64,
    token: u64,
    bus: EventBus,
    rx: mpsc::Receiver<DocEvent>,
}

impl Subscription {
    pub fn doc_id(&self) -> i64 {
        self.doc_id
    }

    /// Wait for the next event; `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<DocEvent> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = DocEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DocEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.doc_id, self.token);
    }
}

/// A boxed, `connected`-first event stream, as handed out by
/// [`crate::ingest::InvoicePipeline::watch`].
pub type DocEventStream = Pin<Box<dyn Stream<Item = DocEvent> + Send>>;
