//! Signaling messages and the channel contract consumed by the transports
//!
//! The transports only need three primitives from whoever carries the
//! messages: `send_offer`, `send_answer` and `send_ice_candidate`. Delivery
//! is fire-and-forget. [`SignalingHub`] is an in-process relay implementing
//! the contract, used by the server's signaling WebSocket and in tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{AppError, Result};

/// Inbound queue depth per registered peer
const ENDPOINT_QUEUE: usize = 64;

/// Signaling message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// SDP offer
    Offer(SdpOffer),
    /// SDP answer
    Answer(SdpAnswer),
    /// Trickled ICE candidate
    Candidate(IceCandidate),
    /// Viewer asks the host for an offer
    Join,
    /// Viewer left; the host may drop its leg
    Leave,
    /// Session closed by the sender
    Close,
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::Candidate(_) => "candidate",
            SignalingMessage::Join => "join",
            SignalingMessage::Leave => "leave",
            SignalingMessage::Close => "close",
        }
    }
}

/// Addressed signaling message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub from: String,
    pub to: String,
    pub message: SignalingMessage,
}

/// SDP offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpOffer {
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// SDP answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAnswer {
    pub sdp: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Outbound half of a signaling transport
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Deliver `message` to `target_id`
    async fn send(&self, target_id: &str, message: SignalingMessage) -> Result<()>;

    async fn send_offer(&self, target_id: &str, offer: SdpOffer) -> Result<()> {
        self.send(target_id, SignalingMessage::Offer(offer)).await
    }

    async fn send_answer(&self, target_id: &str, answer: SdpAnswer) -> Result<()> {
        self.send(target_id, SignalingMessage::Answer(answer)).await
    }

    async fn send_ice_candidate(&self, target_id: &str, candidate: IceCandidate) -> Result<()> {
        self.send(target_id, SignalingMessage::Candidate(candidate))
            .await
    }
}

/// In-process signaling relay keyed by peer id
#[derive(Clone, Default)]
pub struct SignalingHub {
    peers: Arc<RwLock<HashMap<String, Registration>>>,
    next_generation: Arc<AtomicU64>,
}

struct Registration {
    generation: u64,
    tx: mpsc::Sender<SignalEnvelope>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer_id` and get its endpoint
    ///
    /// Registering an id again replaces the previous endpoint's inbox.
    pub fn register(&self, peer_id: impl Into<String>) -> SignalingEndpoint {
        let peer_id = peer_id.into();
        let (tx, rx) = mpsc::channel(ENDPOINT_QUEUE);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if self
            .peers
            .write()
            .insert(peer_id.clone(), Registration { generation, tx })
            .is_some()
        {
            debug!("Signaling peer {} re-registered", peer_id);
        }
        SignalingEndpoint {
            hub: self.clone(),
            generation,
            sender: HubSender {
                hub: self.clone(),
                local_id: peer_id,
            },
            rx,
        }
    }

    fn unregister(&self, peer_id: &str, generation: u64) {
        let mut peers = self.peers.write();
        // Only remove our own inbox, not a newer registration
        if peers
            .get(peer_id)
            .is_some_and(|registration| registration.generation == generation)
        {
            peers.remove(peer_id);
        }
    }

    /// Route an envelope to its target without waiting
    ///
    /// A message for a peer whose inbox is full is dropped and logged; the
    /// caller never blocks on a slow reader.
    pub fn route(&self, envelope: SignalEnvelope) -> Result<()> {
        let tx = self
            .peers
            .read()
            .get(&envelope.to)
            .map(|registration| registration.tx.clone());
        let tx = tx.ok_or_else(|| {
            AppError::NotFound(format!("Signaling peer not connected: {}", envelope.to))
        })?;

        trace!(
            "Signal {} {} -> {}",
            envelope.message.kind(),
            envelope.from,
            envelope.to
        );

        match tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "Signaling inbox of {} is full, dropping {} from {}",
                    dropped.to,
                    dropped.message.kind(),
                    dropped.from
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(AppError::NotFound("Signaling peer went away".to_string()))
            }
        }
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

/// Sending side bound to a local peer id
#[derive(Clone)]
pub struct HubSender {
    hub: SignalingHub,
    local_id: String,
}

impl HubSender {
    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

#[async_trait]
impl SignalingChannel for HubSender {
    async fn send(&self, target_id: &str, message: SignalingMessage) -> Result<()> {
        self.hub.route(SignalEnvelope {
            from: self.local_id.clone(),
            to: target_id.to_string(),
            message,
        })
    }
}

/// A registered peer: sender plus inbound queue
///
/// Dropping the endpoint unregisters the peer.
pub struct SignalingEndpoint {
    hub: SignalingHub,
    generation: u64,
    sender: HubSender,
    rx: mpsc::Receiver<SignalEnvelope>,
}

impl SignalingEndpoint {
    pub fn local_id(&self) -> &str {
        &self.sender.local_id
    }

    /// Cloneable sender usable as a [`SignalingChannel`]
    pub fn sender(&self) -> HubSender {
        self.sender.clone()
    }

    /// Next inbound message
    pub async fn recv(&mut self) -> Option<SignalEnvelope> {
        self.rx.recv().await
    }
}

impl Drop for SignalingEndpoint {
    fn drop(&mut self) {
        self.hub.unregister(&self.sender.local_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let msg = SignalingMessage::Candidate(IceCandidate::new("candidate:1").with_mid("0", 0));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "candidate");
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);

        let join: SignalingMessage = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert!(matches!(join, SignalingMessage::Join));
    }

    #[tokio::test]
    async fn test_hub_routes_between_peers() {
        let hub = SignalingHub::new();
        let host = hub.register("host");
        let mut viewer = hub.register("viewer");

        host.sender()
            .send_offer("viewer", SdpOffer::new("v=0"))
            .await
            .unwrap();

        let envelope = viewer.recv().await.unwrap();
        assert_eq!(envelope.from, "host");
        assert_eq!(envelope.to, "viewer");
        assert!(matches!(envelope.message, SignalingMessage::Offer(ref o) if o.sdp == "v=0"));
    }

    #[tokio::test]
    async fn test_unknown_target_and_unregister() {
        let hub = SignalingHub::new();
        let host = hub.register("host");
        let viewer = hub.register("viewer");
        assert_eq!(hub.peer_count(), 2);

        drop(viewer);
        assert!(!hub.is_connected("viewer"));

        let err = host.sender().send("viewer", SignalingMessage::Join).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reregistration_survives_old_drop() {
        let hub = SignalingHub::new();
        let old = hub.register("viewer");
        let mut new = hub.register("viewer");
        drop(old);
        assert!(hub.is_connected("viewer"));

        let host = hub.register("host");
        host.sender().send("viewer", SignalingMessage::Leave).await.unwrap();
        assert!(matches!(new.recv().await.unwrap().message, SignalingMessage::Leave));
    }

    #[tokio::test]
    async fn test_full_inbox_drops_instead_of_blocking() {
        let hub = SignalingHub::new();
        let host = hub.register("host");
        let mut stalled = hub.register("stalled");
        let sender = host.sender();

        let flood = async {
            for i in 0..(ENDPOINT_QUEUE + 36) {
                sender
                    .send_ice_candidate("stalled", IceCandidate::new(format!("candidate:{}", i)))
                    .await
                    .unwrap();
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), flood)
            .await
            .expect("sending to a full inbox must not block");

        let mut delivered = 0;
        while let Ok(envelope) = stalled.rx.try_recv() {
            if let SignalingMessage::Candidate(c) = envelope.message {
                assert_eq!(c.candidate, format!("candidate:{}", delivered));
            }
            delivered += 1;
        }
        assert_eq!(delivered, ENDPOINT_QUEUE);
    }
}
