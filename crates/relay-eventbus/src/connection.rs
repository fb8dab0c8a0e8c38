use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::warn;

use relay_core::RequestId;

use crate::decode::decode_outgoing_event;
use crate::frames::InboundFrame;
use crate::EventBus;

/// Axum handler — upgrades HTTP to WebSocket at `GET /events`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(bus): State<Arc<EventBus>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, bus))
}

/// Per-connection task: one branch reads inbound frames, one drains the
/// broadcast channel of outbound frames. Lives for the connection's
/// lifetime.
async fn handle_connection(socket: WebSocket, bus: Arc<EventBus>) {
    let (mut tx, mut rx) = socket.split();
    let mut broadcast_rx = bus.broadcaster.subscribe();

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &bus).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error, closing connection");
                        break;
                    }
                    _ => {}
                }
            }

            event = broadcast_rx.recv() => {
                match event {
                    Ok(payload) => {
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn handle_frame(text: &str, bus: &Arc<EventBus>) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed frame, ignoring");
            return;
        }
    };

    match frame {
        InboundFrame::BotResponse(f) => match decode_outgoing_event(&f.event_type, &f.data) {
            Ok(event) => {
                bus.queue.enqueue(event, &bus.broadcaster, bus.adapter_type).await;
            }
            Err(e) => warn!(error = %e, "invalid bot_response payload, dropping"),
        },
        InboundFrame::CancelRequest(f) => {
            bus.queue.cancel(&RequestId::from(f.request_id), &bus.broadcaster, bus.adapter_type);
        }
    }
}
