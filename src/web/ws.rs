//! WebSocket handlers for real-time updates
//!
//! - `/api/ws`: system events with topic-based filtering and heartbeat
//! - `/api/live/ws`: the live-session list, one full snapshot per change

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::directory::LiveSession;
use crate::events::SystemEvent;
use crate::state::AppState;

/// Heartbeat period for both sockets
const HEARTBEAT_SECS: u64 = 30;

/// Client-to-server message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ClientMessage {
    /// Subscribe to event topics
    #[serde(rename = "subscribe")]
    Subscribe { topics: Vec<String> },

    /// Unsubscribe from event topics
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<String> },

    /// Ping (keep-alive)
    #[serde(rename = "ping")]
    Ping,
}

/// WebSocket upgrade handler for `/api/ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut event_rx = state.events.subscribe();

    // Nothing is sent until the client subscribes
    let mut subscribed_topics: Vec<String> = vec![];

    info!("WebSocket client connected");

    let mut heartbeat_interval =
        tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_SECS));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut subscribed_topics) {
                            warn!("Failed to handle client message: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if should_send_event(&event, &subscribed_topics) {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    warn!("Failed to send event to client, disconnecting");
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                        let error_event = SystemEvent::SystemError {
                            module: "events".to_string(),
                            severity: "warning".to_string(),
                            message: format!("Lagged by {} events", n),
                        };
                        if let Ok(json) = serde_json::to_string(&error_event) {
                            let _ = sender.send(Message::Text(json)).await;
                        }
                    }
                    Err(_) => {
                        warn!("Event bus closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping, disconnecting");
                    break;
                }
            }
        }
    }

    debug!("Event WebSocket handler exiting");
}

fn handle_client_message(text: &str, topics: &mut Vec<String>) -> serde_json::Result<()> {
    let msg: ClientMessage = serde_json::from_str(text)?;

    match msg {
        ClientMessage::Subscribe { topics: new_topics } => {
            info!("Client subscribed to topics: {:?}", new_topics);
            *topics = new_topics;
        }
        ClientMessage::Unsubscribe {
            topics: remove_topics,
        } => {
            topics.retain(|t| !remove_topics.contains(t));
            info!("Client unsubscribed from topics: {:?}", remove_topics);
        }
        ClientMessage::Ping => {
            debug!("Received ping from client");
        }
    }

    Ok(())
}

fn should_send_event(event: &SystemEvent, topics: &[String]) -> bool {
    if topics.is_empty() {
        return false;
    }

    if topics.iter().any(|t| t == "*") {
        return true;
    }

    topics.iter().any(|topic| event.matches_topic(topic))
}

/// Frame pushed on `/api/live/ws`
#[derive(Serialize)]
struct LiveListFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    sessions: &'a [LiveSession],
}

/// WebSocket upgrade handler for `/api/live/ws`
pub async fn live_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_live_socket(socket, state))
}

async fn handle_live_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.directory.list_live();
    let mut heartbeat_interval =
        tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_SECS));

    debug!("Live list subscriber connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Live list socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            snapshot = subscription.next() => {
                let Some(sessions) = snapshot else { break };
                let frame = LiveListFrame {
                    kind: "live_list",
                    sessions: &sessions,
                };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize live list: {}", e),
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }

    // A closed socket must never see a late snapshot
    subscription.cancel();
    debug!("Live list subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended() -> SystemEvent {
        SystemEvent::SessionEnded {
            session_id: "s1".to_string(),
            ended_by: Some("h1".to_string()),
        }
    }

    #[test]
    fn test_should_send_event_wildcard() {
        assert!(should_send_event(&ended(), &["*".to_string()]));
    }

    #[test]
    fn test_should_send_event_prefix() {
        assert!(should_send_event(&ended(), &["live.*".to_string()]));
        assert!(!should_send_event(&ended(), &["transport.*".to_string()]));
    }

    #[test]
    fn test_should_send_event_exact_and_empty() {
        assert!(should_send_event(
            &ended(),
            &["live.session_ended".to_string()]
        ));
        assert!(!should_send_event(&ended(), &[]));
    }

    #[test]
    fn test_client_message_updates_topics() {
        let mut topics = vec![];
        handle_client_message(
            r#"{"type":"subscribe","payload":{"topics":["live.*","transport.failed"]}}"#,
            &mut topics,
        )
        .unwrap();
        assert_eq!(topics.len(), 2);

        handle_client_message(
            r#"{"type":"unsubscribe","payload":{"topics":["live.*"]}}"#,
            &mut topics,
        )
        .unwrap();
        assert_eq!(topics, vec!["transport.failed".to_string()]);
    }
}
