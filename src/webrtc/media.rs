//! Local capture streams and remote media handles
//!
//! A [`LocalMediaStream`] is what the broadcaster exclusively owns: one
//! audio and one video [`LocalTrack`], each a webrtc-rs sample track that
//! can be attached to any number of peer connections. Frames come from an
//! encoder outside this crate through [`LocalTrack::write_sample`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CaptureConfig;
use crate::error::{AppError, Result};

/// Camera facing preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    #[default]
    #[serde(alias = "front")]
    User,
    /// Back camera
    #[serde(alias = "back")]
    Environment,
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// What to ask the capture source for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio: bool,
    pub video: bool,
}

impl CaptureConstraints {
    /// Portrait 720x1280 @ 30fps with audio and video
    pub fn for_facing(facing: FacingMode) -> Self {
        Self {
            facing,
            width: 720,
            height: 1280,
            fps: 30,
            audio: true,
            video: true,
        }
    }

    pub fn from_config(config: &CaptureConfig, facing: FacingMode) -> Self {
        Self {
            facing,
            width: config.width,
            height: config.height,
            fps: config.fps,
            audio: true,
            video: true,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Codec negotiated for this kind (H.264 video, Opus audio)
    pub fn codec_capability(&self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/H264".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                rtcp_feedback: vec![],
            },
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
        }
    }
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }
}

#[derive(Debug)]
struct TrackFlags {
    live: AtomicBool,
    muted: AtomicBool,
}

/// One locally captured track
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    id: String,
    track: Arc<TrackLocalStaticSample>,
    flags: Arc<TrackFlags>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = track_id.into();
        let track = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            id.clone(),
            stream_id.into(),
        ));

        Self {
            kind,
            id,
            track,
            flags: Arc::new(TrackFlags {
                live: AtomicBool::new(true),
                muted: AtomicBool::new(false),
            }),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track handle to attach to a peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn is_live(&self) -> bool {
        self.flags.live.load(Ordering::Acquire)
    }

    /// Stop the track; it never produces media again
    pub fn stop(&self) {
        if self.flags.live.swap(false, Ordering::AcqRel) {
            debug!("Local {:?} track {} stopped", self.kind, self.id);
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.flags.muted.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.flags.muted.load(Ordering::Acquire)
    }

    /// Push one encoded frame; returns `false` when the track dropped it
    /// because it is stopped or muted
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if !self.is_live() || self.is_muted() {
            trace!("Dropping sample on inactive track {}", self.id);
            return Ok(false);
        }

        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AppError::WebRtcError(format!("write_sample failed: {}", e)))?;
        Ok(true)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("live", &self.is_live())
            .field("muted", &self.is_muted())
            .finish()
    }
}

/// The broadcaster's capture stream
#[derive(Debug)]
pub struct LocalMediaStream {
    id: String,
    constraints: CaptureConstraints,
    tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    pub fn new(id: impl Into<String>, constraints: CaptureConstraints, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            constraints,
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn facing(&self) -> FacingMode {
        self.constraints.facing
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    /// Mute or unmute every video track
    pub fn set_video_muted(&self, muted: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == TrackKind::Video) {
            track.set_muted(muted);
        }
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
        info!("Local stream {} stopped", self.id);
    }
}

/// Media received from the remote side of a connection
#[derive(Clone)]
pub struct RemoteMediaStream {
    pub stream_id: String,
    pub tracks: Vec<Arc<TrackRemote>>,
}

impl RemoteMediaStream {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .any(|t| TrackKind::from(t.kind()) == kind)
    }
}

impl std::fmt::Debug for RemoteMediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMediaStream")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Source of local capture streams
///
/// Implementations must either hand back a fully acquired stream or fail
/// without leaving any track running. A refused platform permission is
/// reported as [`AppError::PermissionDenied`].
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<LocalMediaStream>;
}

/// Capture source whose tracks are fed by an external encoder
pub struct SampleCaptureSource {
    permission_granted: bool,
    stream_label: String,
}

impl SampleCaptureSource {
    pub fn new(stream_label: impl Into<String>) -> Self {
        Self {
            permission_granted: true,
            stream_label: stream_label.into(),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            permission_granted: config.permission_granted,
            stream_label: "livecast".to_string(),
        }
    }

    /// Simulate the platform refusing capture access
    pub fn denied() -> Self {
        Self {
            permission_granted: false,
            stream_label: "livecast".to_string(),
        }
    }
}

impl Default for SampleCaptureSource {
    fn default() -> Self {
        Self::new("livecast")
    }
}

#[async_trait]
impl CaptureSource for SampleCaptureSource {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<LocalMediaStream> {
        if !self.permission_granted {
            return Err(AppError::PermissionDenied(
                "camera/microphone access was refused".to_string(),
            ));
        }
        if !constraints.audio && !constraints.video {
            return Err(AppError::BadRequest(
                "capture needs at least one of audio or video".to_string(),
            ));
        }

        let stream_id = format!("{}-{}", self.stream_label, uuid::Uuid::new_v4());
        let mut tracks = Vec::with_capacity(2);
        if constraints.audio {
            tracks.push(LocalTrack::new(
                TrackKind::Audio,
                format!("audio-{}", constraints.facing),
                stream_id.clone(),
            ));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(
                TrackKind::Video,
                format!("video-{}", constraints.facing),
                stream_id.clone(),
            ));
        }

        info!(
            "Capture acquired: {} ({}x{} @ {}fps, facing {})",
            stream_id, constraints.width, constraints.height, constraints.fps, constraints.facing
        );

        Ok(LocalMediaStream::new(stream_id, constraints.clone(), tracks))
    }
}
