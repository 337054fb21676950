//! WebRTC peer connection wrapper with negotiation tracking

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, trace, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::config::{build_api, WebRtcConfig};
use super::media::{LocalTrack, RemoteMediaStream, TrackKind};
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use crate::error::{AppError, Result};

/// Which side of a broadcast a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Broadcaster,
    Viewer,
}

/// Identity of a connection: local role plus remote party
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "viewer_id", rename_all = "snake_case")]
pub enum PeerKey {
    /// The broadcaster's shared connection
    Broadcaster,
    /// A broadcaster-side connection dedicated to one viewer
    BroadcastLeg(String),
    /// A viewer's inbound connection
    Viewer(String),
}

impl PeerKey {
    pub fn role(&self) -> PeerRole {
        match self {
            PeerKey::Broadcaster | PeerKey::BroadcastLeg(_) => PeerRole::Broadcaster,
            PeerKey::Viewer(_) => PeerRole::Viewer,
        }
    }

    pub fn viewer_id(&self) -> Option<&str> {
        match self {
            PeerKey::Broadcaster => None,
            PeerKey::BroadcastLeg(id) | PeerKey::Viewer(id) => Some(id),
        }
    }
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerKey::Broadcaster => write!(f, "broadcaster"),
            PeerKey::BroadcastLeg(id) => write!(f, "broadcaster->{}", id),
            PeerKey::Viewer(id) => write!(f, "viewer:{}", id),
        }
    }
}

/// Offer/answer progress of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    New,
    OfferSent,
    OfferReceived,
    AnswerSent,
    Stable,
    Closed,
}

/// Events emitted by connections, fanned out to every subscriber
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A local ICE candidate to relay to the remote party
    LocalCandidate { peer: PeerKey, candidate: IceCandidate },
    /// Inbound media arrived on a viewer connection
    RemoteTrack {
        viewer_id: String,
        stream_id: String,
        kind: TrackKind,
    },
    /// Transport-level connection state changed
    StateChanged { peer: PeerKey, state: ConnectionState },
}

/// What happened to a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    /// Held until the remote description lands
    Buffered,
}

struct Negotiation {
    state: NegotiationState,
    remote_description_set: bool,
    pending_remote_candidates: Vec<IceCandidate>,
}

/// One negotiated point-to-point connection
pub struct PeerConnection {
    key: PeerKey,
    pc: Arc<RTCPeerConnection>,
    negotiation: Mutex<Negotiation>,
    state_rx: watch::Receiver<ConnectionState>,
    remote_stream: Arc<RwLock<Option<RemoteMediaStream>>>,
    closed: AtomicBool,
}

impl PeerConnection {
    /// Create a connection using the configured ICE servers
    pub async fn new(
        config: &WebRtcConfig,
        key: PeerKey,
        events: broadcast::Sender<MeshEvent>,
    ) -> Result<Self> {
        let api = build_api(&key.to_string())?;
        let pc = api
            .new_peer_connection(config.rtc_configuration())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);

        let connection = Self {
            key,
            pc: Arc::new(pc),
            negotiation: Mutex::new(Negotiation {
                state: NegotiationState::New,
                remote_description_set: false,
                pending_remote_candidates: Vec::new(),
            }),
            state_rx,
            remote_stream: Arc::new(RwLock::new(None)),
            closed: AtomicBool::new(false),
        };

        connection.setup_event_handlers(Arc::new(state_tx), events);
        debug!("Peer connection created: {}", connection.key);

        Ok(connection)
    }

    fn setup_event_handlers(
        &self,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        events: broadcast::Sender<MeshEvent>,
    ) {
        let key = self.key.clone();
        let state_events = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let events = state_events.clone();
                let key = key.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", key, new_state);
                    let _ = state_tx.send(new_state);
                    let _ = events.send(MeshEvent::StateChanged {
                        peer: key,
                        state: new_state,
                    });
                })
            }));

        let key = self.key.clone();
        let candidate_events = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();
                let key = key.clone();

                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            trace!("Local ICE candidate for {}: {}", key, init.candidate);
                            let _ = events.send(MeshEvent::LocalCandidate {
                                peer: key,
                                candidate: IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                    username_fragment: init.username_fragment,
                                },
                            });
                        }
                        Err(e) => debug!("Failed to serialize ICE candidate for {}: {}", key, e),
                    }
                })
            }));

        // Only viewer connections receive media
        if let PeerKey::Viewer(viewer_id) = &self.key {
            let viewer_id = viewer_id.clone();
            let remote_stream = self.remote_stream.clone();
            self.pc.on_track(Box::new(
                move |track: Arc<TrackRemote>,
                      _receiver: Arc<RTCRtpReceiver>,
                      _transceiver: Arc<RTCRtpTransceiver>| {
                    let viewer_id = viewer_id.clone();
                    let remote_stream = remote_stream.clone();
                    let events = events.clone();

                    Box::pin(async move {
                        let stream_id = track.stream_id();
                        let kind = TrackKind::from(track.kind());
                        {
                            let mut slot = remote_stream.write();
                            let stream =
                                slot.get_or_insert_with(|| RemoteMediaStream::new(stream_id.clone()));
                            stream.tracks.push(track);
                        }
                        info!(
                            "Viewer {} received remote {:?} track (stream {})",
                            viewer_id, kind, stream_id
                        );
                        let _ = events.send(MeshEvent::RemoteTrack {
                            viewer_id,
                            stream_id,
                            kind,
                        });
                    })
                },
            ));
        }
    }

    pub fn key(&self) -> &PeerKey {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::NotInitialized(format!(
                "Peer connection {} is closed",
                self.key
            )));
        }
        Ok(())
    }

    /// Attach a local track
    pub async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.ensure_open()?;
        self.pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!(
                    "Failed to add {:?} track to {}: {}",
                    track.kind(),
                    self.key,
                    e
                ))
            })?;
        debug!("{:?} track {} attached to {}", track.kind(), track.id(), self.key);
        Ok(())
    }

    /// Generate and set a local offer
    pub async fn create_offer(&self) -> Result<SdpOffer> {
        self.ensure_open()?;
        let mut negotiation = self.negotiation.lock().await;

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        // Local description is set before the SDP leaves this function
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        negotiation.state = NegotiationState::OfferSent;
        debug!("Offer created for {}", self.key);
        Ok(SdpOffer::new(offer.sdp))
    }

    /// Apply the remote answer to our offer
    pub async fn apply_answer(&self, answer: SdpAnswer) -> Result<()> {
        self.ensure_open()?;
        let mut negotiation = self.negotiation.lock().await;

        let sdp = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP answer: {}", e)))?;
        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })?;

        negotiation.remote_description_set = true;
        negotiation.state = NegotiationState::Stable;
        self.flush_pending(&mut negotiation).await;

        debug!("Answer applied on {}", self.key);
        Ok(())
    }

    /// Apply a remote offer and produce our answer
    pub async fn accept_offer(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        self.ensure_open()?;
        let mut negotiation = self.negotiation.lock().await;

        let sdp = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP offer: {}", e)))?;
        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })?;

        negotiation.remote_description_set = true;
        negotiation.state = NegotiationState::OfferReceived;
        self.flush_pending(&mut negotiation).await;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        negotiation.state = NegotiationState::AnswerSent;
        debug!("Answer created for {}", self.key);
        Ok(SdpAnswer::new(answer.sdp))
    }

    /// Apply a remote candidate, or buffer it until the remote description is set
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<CandidateDisposition> {
        self.ensure_open()?;
        let mut negotiation = self.negotiation.lock().await;

        if !negotiation.remote_description_set {
            trace!("Buffering early ICE candidate for {}", self.key);
            negotiation.pending_remote_candidates.push(candidate);
            return Ok(CandidateDisposition::Buffered);
        }

        self.apply_candidate(candidate).await?;
        Ok(CandidateDisposition::Applied)
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    /// Drain buffered candidates in arrival order
    async fn flush_pending(&self, negotiation: &mut Negotiation) {
        let pending = std::mem::take(&mut negotiation.pending_remote_candidates);
        if pending.is_empty() {
            return;
        }

        debug!("Applying {} buffered ICE candidate(s) on {}", pending.len(), self.key);
        for candidate in pending {
            if let Err(e) = self.apply_candidate(candidate).await {
                warn!("Buffered candidate rejected on {}: {}", self.key, e);
            }
        }
    }

    pub async fn negotiation_state(&self) -> NegotiationState {
        if self.is_closed() {
            return NegotiationState::Closed;
        }
        self.negotiation.lock().await.state
    }

    pub async fn pending_candidate_count(&self) -> usize {
        self.negotiation.lock().await.pending_remote_candidates.len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Inbound media recorded on a viewer connection
    pub fn remote_stream(&self) -> Option<RemoteMediaStream> {
        self.remote_stream.read().clone()
    }

    /// Close the connection; later calls are no-ops
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut negotiation = self.negotiation.lock().await;
            negotiation.state = NegotiationState::Closed;
            negotiation.pending_remote_candidates.clear();
        }
        self.remote_stream.write().take();

        self.pc
            .close()
            .await
            .map_err(|e| AppError::transport_teardown(self.key.to_string(), e))?;

        debug!("Peer connection closed: {}", self.key);
        Ok(())
    }
}
