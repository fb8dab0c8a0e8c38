use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use relay_core::RequestId;
use relay_pipeline::{OutgoingEvent, OutgoingEventProcessor};

use crate::broadcast::EventBroadcaster;
use crate::encode::{encode_outgoing_result, encode_status};

struct QueuedRequest {
    request_id: RequestId,
    event: OutgoingEvent,
}

/// Single-consumer FIFO queue of `bot_response` requests, per §4.7. One
/// worker task drains it in order; `cancel_request` removes a still-queued
/// entry before it is ever handed to `OutgoingEventProcessor` — there is no
/// mid-flight preemption once the worker has picked it up. `pending`'s
/// presence/absence of an id is itself the cancellation signal: removing an
/// entry here is what `worker` checks before dispatching, so the map needs
/// no payload beyond the key.
pub struct RequestQueue {
    tx: mpsc::Sender<QueuedRequest>,
    pending: Arc<DashMap<RequestId, ()>>,
    shutting_down: Arc<AtomicBool>,
}

impl RequestQueue {
    pub fn spawn(outgoing: Arc<OutgoingEventProcessor>, adapter_type: &'static str, broadcaster: EventBroadcaster) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let pending = Arc::new(DashMap::new());
        let shutting_down = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::worker(rx, outgoing, adapter_type, broadcaster, Arc::clone(&pending), Arc::clone(&shutting_down)));

        Self { tx, pending, shutting_down }
    }

    /// Assigns a `request_id`, emits `request_queued`, then enqueues for
    /// the worker. Returns the assigned id.
    pub async fn enqueue(&self, event: OutgoingEvent, broadcaster: &EventBroadcaster, adapter_type: &str) -> RequestId {
        let request_id = RequestId::new();
        self.pending.insert(request_id.clone(), ());
        broadcaster.send(encode_status("request_queued", adapter_type, request_id.as_str(), None));

        if self.tx.send(QueuedRequest { request_id: request_id.clone(), event }).await.is_err() {
            warn!(request_id = %request_id, "queue worker gone, request dropped");
            self.pending.remove(&request_id);
            broadcaster.send(encode_status(
                "request_failed",
                adapter_type,
                request_id.as_str(),
                Some(json!({ "error": "FATAL_ERROR", "message": "event bus worker is not running" })),
            ));
        }

        request_id
    }

    /// `cancel_request {request_id}`: removes a still-queued entry and
    /// emits `request_success`; an in-flight or unknown id emits
    /// `request_failed` instead.
    pub fn cancel(&self, request_id: &RequestId, broadcaster: &EventBroadcaster, adapter_type: &str) {
        if self.pending.remove(request_id).is_some() {
            broadcaster.send(encode_status("request_success", adapter_type, request_id.as_str(), None));
        } else {
            broadcaster.send(encode_status(
                "request_failed",
                adapter_type,
                request_id.as_str(),
                Some(json!({ "error": "VALIDATION_ERROR", "message": "request is in flight or unknown" })),
            ));
        }
    }

    /// Marks the bus as shutting down — every request still in the channel
    /// when the worker next reaches it gets `request_failed` instead of
    /// being dispatched. Dropping the sender half then lets the worker
    /// drain and exit once the channel empties.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    async fn worker(
        mut rx: mpsc::Receiver<QueuedRequest>,
        outgoing: Arc<OutgoingEventProcessor>,
        adapter_type: &'static str,
        broadcaster: EventBroadcaster,
        pending: Arc<DashMap<RequestId, ()>>,
        shutting_down: Arc<AtomicBool>,
    ) {
        while let Some(queued) = rx.recv().await {
            // If `cancel` already removed this id from `pending`, the
            // request must not reach `OutgoingEventProcessor` — the
            // cancellation's `request_success` has already been emitted.
            if pending.remove(&queued.request_id).is_none() {
                continue;
            }

            if shutting_down.load(Ordering::SeqCst) {
                broadcaster.send(encode_status(
                    "request_failed",
                    adapter_type,
                    queued.request_id.as_str(),
                    Some(json!({ "error": "FATAL_ERROR", "message": "event bus shutting down" })),
                ));
                continue;
            }

            let frame = match outgoing.dispatch(queued.event).await {
                Ok(result) => encode_status("request_success", adapter_type, queued.request_id.as_str(), Some(encode_outgoing_result(result))),
                Err(e) => encode_status(
                    "request_failed",
                    adapter_type,
                    queued.request_id.as_str(),
                    Some(json!({ "error": e.code(), "message": e.to_string() })),
                ),
            };
            broadcaster.send(frame);
        }
    }
}
