//! WebSocket subscription endpoint
//!
//! On attach: send the `connected` handshake, then drain the subscription -
//! buffered backlog first, live events after - as JSON text frames. The
//! socket closes after the terminal envelope, when the client disconnects,
//! or when a lagged subscriber is dropped by the bus.

use crate::server::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tabular_agent::Subscription;
use tabular_core::{AgentEvent, EventEnvelope, SessionId};
use tracing::{debug, warn};

pub async fn ws_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match state.manager.subscribe(&id) {
        Ok(subscription) => {
            ws.on_upgrade(move |socket| stream_events(socket, id, subscription))
                .into_response()
        }
        Err(e) => (
            StatusCode::NOT_FOUND,
            format!("{}: {}", e.kind(), e),
        )
            .into_response(),
    }
}

async fn stream_events(socket: WebSocket, session_id: String, mut subscription: Subscription) {
    let (mut tx, mut rx) = socket.split();

    // Handshake ack before any replayed history
    let connected = EventEnvelope::stamp(&SessionId::new(&session_id), &AgentEvent::Connected);
    if send_envelope(&mut tx, &connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            envelope = subscription.next() => {
                let Some(envelope) = envelope else {
                    debug!("session {}: event stream drained", session_id);
                    break;
                };
                let terminal = envelope.is_terminal();
                if send_envelope(&mut tx, &envelope).await.is_err() {
                    return; // client went away
                }
                if terminal {
                    debug!("session {}: terminal event delivered", session_id);
                    break;
                }
            }
            incoming = rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("session {}: client disconnected", session_id);
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("session {}: websocket error: {}", session_id, e);
                        return;
                    }
                    // Pings are answered by axum; other frames are ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = tx.send(WsMessage::Close(None)).await;
}

async fn send_envelope(
    tx: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    envelope: &EventEnvelope,
) -> Result<(), ()> {
    let json = serde_json::to_string(envelope).map_err(|_| ())?;
    tx.send(WsMessage::Text(json)).await.map_err(|_| ())
}
