//! Peer-to-peer broadcast transport built on webrtc-rs
//!
//! Architecture:
//! ```text
//!  CaptureSource ──> LocalMediaStream (audio + video tracks)
//!                          │ shared
//!          ┌───────────────┼────────────────┐
//!          v               v                v
//!   primary connection   leg(viewer A)   leg(viewer B)     broadcaster device
//!          │               │                │
//!          └── SDP / ICE via SignalingChannel ──┐
//!                                               v
//!                                  viewer connection (per viewer id)
//! ```

pub mod config;
pub mod mdns;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod signaling;

pub use config::WebRtcConfig;
pub use media::{
    CaptureConstraints, CaptureSource, FacingMode, LocalMediaStream, LocalTrack,
    RemoteMediaStream, SampleCaptureSource, TrackKind,
};
pub use mesh::{BroadcasterHandle, PeerMeshEngine, TeardownReport};
pub use peer::{CandidateDisposition, MeshEvent, NegotiationState, PeerConnection, PeerKey, PeerRole};
pub use signaling::{
    ConnectionState, HubSender, IceCandidate, SdpAnswer, SdpOffer, SignalEnvelope,
    SignalingChannel, SignalingEndpoint, SignalingHub, SignalingMessage,
};
