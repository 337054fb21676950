//! Signaling relay over WebSocket
//!
//! A client connects to `/api/signal/ws?peer_id=<id>`, sends
//! `{"to": "<peer>", "message": {...}}` frames and receives
//! [`SignalEnvelope`] frames addressed to it.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::signaling::{SignalEnvelope, SignalingHub, SignalingMessage};

#[derive(Debug, Deserialize)]
pub struct SignalQuery {
    pub peer_id: String,
}

/// Client-to-server frame
#[derive(Debug, Deserialize)]
struct OutboundSignal {
    to: String,
    message: SignalingMessage,
}

/// Delivery failure reported back to the sender
#[derive(Debug, Serialize)]
struct SignalError<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    to: &'a str,
    message: String,
}

pub async fn signal_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SignalQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response> {
    let peer_id = query.peer_id.trim().to_string();
    if peer_id.is_empty() {
        return Err(AppError::BadRequest("peer_id must not be empty".to_string()));
    }

    let hub = state.signaling.clone();
    Ok(ws.on_upgrade(move |socket| handle_signal_socket(socket, hub, peer_id)))
}

async fn handle_signal_socket(socket: WebSocket, hub: SignalingHub, peer_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut endpoint = hub.register(peer_id.clone());
    let outbound = endpoint.sender();

    info!("Signaling peer connected: {}", peer_id);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let signal: OutboundSignal = match serde_json::from_str(&text) {
                            Ok(signal) => signal,
                            Err(e) => {
                                warn!("Malformed signal from {}: {}", peer_id, e);
                                continue;
                            }
                        };

                        let to = signal.to.clone();
                        let routed = hub.route(SignalEnvelope {
                            from: outbound.local_id().to_string(),
                            to: signal.to,
                            message: signal.message,
                        });

                        if let Err(e) = routed {
                            debug!("Signal from {} to {} dropped: {}", peer_id, to, e);
                            let frame = SignalError {
                                kind: "error",
                                to: &to,
                                message: e.to_string(),
                            };
                            if let Ok(json) = serde_json::to_string(&frame) {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Signaling socket error for {}: {}", peer_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            envelope = endpoint.recv() => {
                let Some(envelope) = envelope else { break };
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize signal for {}: {}", peer_id, e),
                }
            }
        }
    }

    // Dropping the endpoint unregisters the peer
    drop(endpoint);
    info!("Signaling peer disconnected: {}", peer_id);
}
