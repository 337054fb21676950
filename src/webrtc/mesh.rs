//! Peer-to-peer broadcast engine
//!
//! Owns every WebRTC connection of one device. The broadcaster role holds a
//! single local capture stream shared by a primary connection and by
//! per-viewer fan-out legs; the viewer role holds one inbound connection per
//! viewer id.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::config::WebRtcConfig;
use super::media::{CaptureConstraints, CaptureSource, FacingMode, LocalMediaStream, RemoteMediaStream};
use super::peer::{CandidateDisposition, MeshEvent, NegotiationState, PeerConnection, PeerKey};
use super::signaling::{IceCandidate, SdpAnswer, SdpOffer};
use crate::config::CaptureConfig;
use crate::error::{AppError, Result};

/// Mesh event channel depth
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct BroadcasterState {
    connection: Arc<PeerConnection>,
    stream: Arc<LocalMediaStream>,
}

/// Handles returned from a successful broadcaster start
#[derive(Clone)]
pub struct BroadcasterHandle {
    pub connection: Arc<PeerConnection>,
    pub stream: Arc<LocalMediaStream>,
}

/// Outcome of a full teardown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub closed: usize,
    pub failed: usize,
}

/// WebRTC connection registry for one device
pub struct PeerMeshEngine {
    config: WebRtcConfig,
    capture: Arc<dyn CaptureSource>,
    capture_config: CaptureConfig,
    broadcaster: Mutex<Option<BroadcasterState>>,
    legs: RwLock<HashMap<String, Arc<PeerConnection>>>,
    viewers: RwLock<HashMap<String, Arc<PeerConnection>>>,
    events: broadcast::Sender<MeshEvent>,
}

impl PeerMeshEngine {
    pub fn new(
        config: WebRtcConfig,
        capture: Arc<dyn CaptureSource>,
        capture_config: CaptureConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            capture,
            capture_config,
            broadcaster: Mutex::new(None),
            legs: RwLock::new(HashMap::new()),
            viewers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to candidate, track and state events
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Broadcaster role
    // ------------------------------------------------------------------

    /// Acquire capture and open the primary broadcaster connection
    pub async fn initialize_broadcaster(&self, facing: FacingMode) -> Result<BroadcasterHandle> {
        let mut slot = self.broadcaster.lock().await;
        if slot.is_some() {
            return Err(AppError::AlreadyInitialized(
                "broadcaster already owns a capture stream".to_string(),
            ));
        }

        let constraints = CaptureConstraints::from_config(&self.capture_config, facing);
        let stream = Arc::new(self.capture.acquire(&constraints).await?);

        let connection =
            match PeerConnection::new(&self.config, PeerKey::Broadcaster, self.events.clone()).await {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    warn!("Broadcaster connection failed, releasing capture: {}", e);
                    stream.stop();
                    return Err(e);
                }
            };

        for track in stream.tracks() {
            if let Err(e) = connection.add_track(track).await {
                warn!("Failed to attach local track, releasing capture: {}", e);
                if let Err(close_err) = connection.close().await {
                    debug!("Close after failed start: {}", close_err);
                }
                stream.stop();
                return Err(e);
            }
        }

        info!(
            "Broadcaster initialized with stream {} ({} tracks)",
            stream.id(),
            stream.tracks().len()
        );

        *slot = Some(BroadcasterState {
            connection: connection.clone(),
            stream: stream.clone(),
        });

        Ok(BroadcasterHandle { connection, stream })
    }

    async fn broadcaster_parts(&self) -> Result<(Arc<PeerConnection>, Arc<LocalMediaStream>)> {
        let slot = self.broadcaster.lock().await;
        match slot.as_ref() {
            Some(state) if !state.connection.is_closed() => {
                Ok((state.connection.clone(), state.stream.clone()))
            }
            _ => Err(AppError::NotInitialized(
                "broadcaster connection is not initialized".to_string(),
            )),
        }
    }

    pub async fn has_broadcaster(&self) -> bool {
        self.broadcaster.lock().await.is_some()
    }

    /// Local capture stream, if the broadcaster is running
    pub async fn local_stream(&self) -> Option<Arc<LocalMediaStream>> {
        self.broadcaster
            .lock()
            .await
            .as_ref()
            .map(|state| state.stream.clone())
    }

    /// Offer from the primary broadcaster connection
    pub async fn create_broadcast_offer(&self) -> Result<SdpOffer> {
        let (connection, _) = self.broadcaster_parts().await?;
        connection.create_offer().await
    }

    /// Open a dedicated leg for `viewer_id` and return its offer
    ///
    /// A leg that already exists for the viewer is replaced. The broadcaster
    /// lock is held until the leg is registered, so a concurrent
    /// [`close_broadcaster`](Self::close_broadcaster) either sees the leg or
    /// makes this call fail.
    pub async fn create_broadcast_offer_for(&self, viewer_id: &str) -> Result<SdpOffer> {
        let slot = self.broadcaster.lock().await;
        let stream = match slot.as_ref() {
            Some(state) if !state.connection.is_closed() => state.stream.clone(),
            _ => {
                return Err(AppError::NotInitialized(
                    "broadcaster connection is not initialized".to_string(),
                ))
            }
        };

        let previous = self.legs.write().await.remove(viewer_id);
        if let Some(old) = previous {
            debug!("Replacing fan-out leg for viewer {}", viewer_id);
            if let Err(e) = old.close().await {
                warn!("Failed to close previous leg for {}: {}", viewer_id, e);
            }
        }

        let leg = Arc::new(
            PeerConnection::new(
                &self.config,
                PeerKey::BroadcastLeg(viewer_id.to_string()),
                self.events.clone(),
            )
            .await?,
        );

        let prepared = async {
            for track in stream.tracks().iter().filter(|t| t.is_live()) {
                leg.add_track(track).await?;
            }
            leg.create_offer().await
        }
        .await;

        match prepared {
            Ok(offer) => {
                self.legs.write().await.insert(viewer_id.to_string(), leg);
                drop(slot);
                info!("Fan-out leg opened for viewer {}", viewer_id);
                Ok(offer)
            }
            Err(e) => {
                drop(slot);
                if let Err(close_err) = leg.close().await {
                    debug!("Close after failed leg setup: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Viewer ids with an open fan-out leg
    pub async fn fanout_viewers(&self) -> Vec<String> {
        self.legs.read().await.keys().cloned().collect()
    }

    /// Apply a viewer's answer to its leg, or to the primary connection
    pub async fn handle_viewer_answer(&self, viewer_id: &str, answer: SdpAnswer) -> Result<()> {
        let leg = self.legs.read().await.get(viewer_id).cloned();
        if let Some(leg) = leg {
            return leg.apply_answer(answer).await;
        }

        let (connection, _) = self.broadcaster_parts().await?;
        debug!("Applying answer from {} to primary broadcaster connection", viewer_id);
        connection.apply_answer(answer).await
    }

    /// Remote candidate for the primary broadcaster connection
    pub async fn add_ice_candidate_to_broadcaster(
        &self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        let (connection, _) = self.broadcaster_parts().await?;
        connection.add_remote_candidate(candidate).await
    }

    /// Remote candidate sent by a viewer, routed to its leg when present
    pub async fn add_ice_candidate_from_viewer(
        &self,
        viewer_id: &str,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        let leg = self.legs.read().await.get(viewer_id).cloned();
        match leg {
            Some(leg) => leg.add_remote_candidate(candidate).await,
            None => self.add_ice_candidate_to_broadcaster(candidate).await,
        }
    }

    /// Drop the leg serving `viewer_id`
    pub async fn close_fanout(&self, viewer_id: &str) {
        let leg = self.legs.write().await.remove(viewer_id);
        if let Some(leg) = leg {
            if let Err(e) = leg.close().await {
                warn!("Error closing leg for {}: {}", viewer_id, e);
            }
            info!("Fan-out leg closed for viewer {}", viewer_id);
        }
    }

    pub async fn fanout_count(&self) -> usize {
        self.legs.read().await.len()
    }

    /// Negotiation progress of the leg serving `viewer_id`
    pub async fn fanout_state(&self, viewer_id: &str) -> Option<NegotiationState> {
        let leg = self.legs.read().await.get(viewer_id).cloned()?;
        Some(leg.negotiation_state().await)
    }

    /// Close the broadcaster connection and legs and stop every local track
    pub async fn close_broadcaster(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        // Lock order: broadcaster, then legs
        let mut slot = self.broadcaster.lock().await;

        let legs: Vec<_> = self.legs.write().await.drain().collect();
        for (viewer_id, leg) in legs {
            tally(&mut report, leg.close().await, &format!("leg {}", viewer_id));
        }

        if let Some(state) = slot.take() {
            tally(&mut report, state.connection.close().await, "broadcaster");
            state.stream.stop();
            info!("Broadcaster closed");
        }

        report
    }

    // ------------------------------------------------------------------
    // Viewer role
    // ------------------------------------------------------------------

    /// Register an inbound connection for `viewer_id`
    pub async fn initialize_viewer(&self, viewer_id: &str) -> Result<Arc<PeerConnection>> {
        let mut viewers = self.viewers.write().await;
        if viewers.contains_key(viewer_id) {
            return Err(AppError::AlreadyInitialized(format!(
                "viewer connection {} already exists",
                viewer_id
            )));
        }

        let connection = Arc::new(
            PeerConnection::new(
                &self.config,
                PeerKey::Viewer(viewer_id.to_string()),
                self.events.clone(),
            )
            .await?,
        );
        viewers.insert(viewer_id.to_string(), connection.clone());
        info!("Viewer connection initialized: {}", viewer_id);

        Ok(connection)
    }

    async fn viewer(&self, viewer_id: &str) -> Result<Arc<PeerConnection>> {
        self.viewers
            .read()
            .await
            .get(viewer_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotInitialized(format!("no viewer connection for {}", viewer_id))
            })
    }

    /// Apply the broadcaster's offer and produce the viewer's answer
    pub async fn create_viewer_answer(&self, viewer_id: &str, offer: SdpOffer) -> Result<SdpAnswer> {
        self.viewer(viewer_id).await?.accept_offer(offer).await
    }

    /// Remote candidate for a viewer connection; never creates one
    pub async fn add_ice_candidate_to_viewer(
        &self,
        viewer_id: &str,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        self.viewer(viewer_id).await?.add_remote_candidate(candidate).await
    }

    pub async fn remote_stream(&self, viewer_id: &str) -> Option<RemoteMediaStream> {
        self.viewers
            .read()
            .await
            .get(viewer_id)
            .and_then(|connection| connection.remote_stream())
    }

    pub async fn close_viewer(&self, viewer_id: &str) -> TeardownReport {
        let mut report = TeardownReport::default();
        let connection = self.viewers.write().await.remove(viewer_id);
        if let Some(connection) = connection {
            tally(&mut report, connection.close().await, viewer_id);
            info!("Viewer connection closed: {}", viewer_id);
        }
        report
    }

    // ------------------------------------------------------------------
    // Whole-engine teardown and introspection
    // ------------------------------------------------------------------

    /// Close everything; per-connection failures are logged and counted
    pub async fn close_all(&self) -> TeardownReport {
        let mut report = self.close_broadcaster().await;

        let viewers: Vec<_> = self.viewers.write().await.drain().collect();
        for (viewer_id, connection) in viewers {
            tally(&mut report, connection.close().await, &viewer_id);
        }

        if report.closed + report.failed > 0 {
            info!(
                "Mesh torn down: {} closed, {} failed",
                report.closed, report.failed
            );
        }
        report
    }

    /// Connections not yet closed
    pub async fn open_connection_count(&self) -> usize {
        let primary = self
            .broadcaster
            .lock()
            .await
            .as_ref()
            .map_or(0, |state| usize::from(!state.connection.is_closed()));
        let legs = self
            .legs
            .read()
            .await
            .values()
            .filter(|c| !c.is_closed())
            .count();
        let viewers = self
            .viewers
            .read()
            .await
            .values()
            .filter(|c| !c.is_closed())
            .count();
        primary + legs + viewers
    }

    /// Local tracks still capturing
    pub async fn active_local_track_count(&self) -> usize {
        self.broadcaster
            .lock()
            .await
            .as_ref()
            .map_or(0, |state| state.stream.live_track_count())
    }
}

fn tally(report: &mut TeardownReport, result: Result<()>, what: &str) {
    match result {
        Ok(()) => report.closed += 1,
        Err(e) => {
            warn!("Teardown of {} failed: {}", what, e);
            report.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::config::TurnServer;
    use crate::webrtc::media::{LocalTrack, SampleCaptureSource};
    use async_trait::async_trait;

    fn mesh_with(config: WebRtcConfig, capture: Arc<dyn CaptureSource>) -> PeerMeshEngine {
        PeerMeshEngine::new(config, capture, CaptureConfig::default())
    }

    fn mesh() -> PeerMeshEngine {
        mesh_with(
            WebRtcConfig::host_only(),
            Arc::new(SampleCaptureSource::default()),
        )
    }

    /// Keeps a handle on every acquired track
    #[derive(Default)]
    struct RecordingCapture {
        inner: SampleCaptureSource,
        acquired: parking_lot::Mutex<Vec<LocalTrack>>,
    }

    #[async_trait]
    impl CaptureSource for RecordingCapture {
        async fn acquire(&self, constraints: &CaptureConstraints) -> Result<LocalMediaStream> {
            let stream = self.inner.acquire(constraints).await?;
            self.acquired.lock().extend(stream.tracks().iter().cloned());
            Ok(stream)
        }
    }

    #[tokio::test]
    async fn test_broadcaster_offer_carries_media() {
        let mesh = mesh();
        let handle = mesh.initialize_broadcaster(FacingMode::User).await.unwrap();
        assert_eq!(handle.stream.tracks().len(), 2);
        assert_eq!(mesh.active_local_track_count().await, 2);

        let offer = mesh.create_broadcast_offer().await.unwrap();
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("m=audio"));
        assert_eq!(
            handle.connection.negotiation_state().await,
            NegotiationState::OfferSent
        );

        mesh.close_all().await;
    }

    #[tokio::test]
    async fn test_second_broadcaster_init_rejected() {
        let mesh = mesh();
        mesh.initialize_broadcaster(FacingMode::User).await.unwrap();
        let err = mesh.initialize_broadcaster(FacingMode::Environment).await;
        assert!(matches!(err, Err(AppError::AlreadyInitialized(_))));
        mesh.close_all().await;
    }

    #[tokio::test]
    async fn test_operations_require_initialization() {
        let mesh = mesh();
        assert!(matches!(
            mesh.create_broadcast_offer().await,
            Err(AppError::NotInitialized(_))
        ));
        assert!(matches!(
            mesh.handle_viewer_answer("v1", SdpAnswer::new("v=0")).await,
            Err(AppError::NotInitialized(_))
        ));
        assert!(matches!(
            mesh.add_ice_candidate_to_broadcaster(IceCandidate::new("candidate:1"))
                .await,
            Err(AppError::NotInitialized(_))
        ));
        assert!(matches!(
            mesh.add_ice_candidate_to_viewer("ghost", IceCandidate::new("candidate:1"))
                .await,
            Err(AppError::NotInitialized(_))
        ));
        assert_eq!(mesh.open_connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_nothing_behind() {
        let mesh = mesh_with(
            WebRtcConfig::host_only(),
            Arc::new(SampleCaptureSource::denied()),
        );
        let err = mesh.initialize_broadcaster(FacingMode::User).await;
        assert!(matches!(err, Err(AppError::PermissionDenied(_))));
        assert!(!mesh.has_broadcaster().await);
        assert_eq!(mesh.open_connection_count().await, 0);
        assert_eq!(mesh.active_local_track_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_after_capture_stops_tracks() {
        let capture = Arc::new(RecordingCapture::default());
        let config = WebRtcConfig {
            stun_servers: vec![],
            turn_servers: vec![TurnServer {
                urls: vec!["bogus:example.invalid".to_string()],
                username: "u".to_string(),
                credential: "p".to_string(),
            }],
        };
        let mesh = mesh_with(config, capture.clone());

        assert!(mesh.initialize_broadcaster(FacingMode::User).await.is_err());
        let acquired = capture.acquired.lock();
        assert_eq!(acquired.len(), 2);
        assert!(acquired.iter().all(|t| !t.is_live()));
        drop(acquired);
        assert!(!mesh.has_broadcaster().await);
    }

    #[tokio::test]
    async fn test_host_and_viewer_negotiate_through_leg() {
        let host = mesh();
        let viewer = mesh();
        host.initialize_broadcaster(FacingMode::User).await.unwrap();

        let offer = host.create_broadcast_offer_for("v1").await.unwrap();
        assert_eq!(host.fanout_count().await, 1);

        let connection = viewer.initialize_viewer("v1").await.unwrap();
        let early = IceCandidate::new("candidate:1 1 udp 2130706431 192.168.1.10 50000 typ host")
            .with_mid("0", 0);
        assert_eq!(
            viewer.add_ice_candidate_to_viewer("v1", early).await.unwrap(),
            CandidateDisposition::Buffered
        );

        let answer = viewer.create_viewer_answer("v1", offer).await.unwrap();
        assert_eq!(connection.pending_candidate_count().await, 0);
        host.handle_viewer_answer("v1", answer).await.unwrap();

        assert_eq!(host.open_connection_count().await, 2);
        assert_eq!(viewer.open_connection_count().await, 1);

        host.close_fanout("v1").await;
        assert_eq!(host.fanout_count().await, 0);

        host.close_all().await;
        viewer.close_all().await;
    }

    #[tokio::test]
    async fn test_duplicate_viewer_rejected() {
        let mesh = mesh();
        mesh.initialize_viewer("v1").await.unwrap();
        assert!(matches!(
            mesh.initialize_viewer("v1").await,
            Err(AppError::AlreadyInitialized(_))
        ));
        mesh.close_all().await;
    }

    #[tokio::test]
    async fn test_close_all_releases_everything() {
        let mesh = mesh();
        mesh.initialize_broadcaster(FacingMode::User).await.unwrap();
        mesh.create_broadcast_offer_for("a").await.unwrap();
        mesh.initialize_viewer("b").await.unwrap();
        assert_eq!(mesh.open_connection_count().await, 3);

        let report = mesh.close_all().await;
        assert_eq!(report, TeardownReport { closed: 3, failed: 0 });
        assert_eq!(mesh.open_connection_count().await, 0);
        assert_eq!(mesh.active_local_track_count().await, 0);

        // Idempotent
        assert_eq!(mesh.close_all().await, TeardownReport::default());
        assert_eq!(mesh.close_broadcaster().await, TeardownReport::default());

        // A fresh start after teardown is clean
        mesh.initialize_broadcaster(FacingMode::Environment)
            .await
            .unwrap();
        assert_eq!(mesh.active_local_track_count().await, 2);
        mesh.close_all().await;
    }

    #[tokio::test]
    async fn test_primary_connection_negotiates_and_flushes_candidates() {
        let host = mesh();
        let viewer = mesh();
        let handle = host.initialize_broadcaster(FacingMode::User).await.unwrap();

        let offer = host.create_broadcast_offer().await.unwrap();
        assert_eq!(
            handle.connection.negotiation_state().await,
            NegotiationState::OfferSent
        );

        // Arrives before the answer
        let early = IceCandidate::new("candidate:1 1 udp 2130706431 192.168.1.20 50002 typ host")
            .with_mid("0", 0);
        assert_eq!(
            host.add_ice_candidate_to_broadcaster(early).await.unwrap(),
            CandidateDisposition::Buffered
        );
        assert_eq!(handle.connection.pending_candidate_count().await, 1);

        viewer.initialize_viewer("v1").await.unwrap();
        let answer = viewer.create_viewer_answer("v1", offer).await.unwrap();

        // No leg for v1, so the answer lands on the primary connection
        host.handle_viewer_answer("v1", answer).await.unwrap();
        assert_eq!(host.fanout_count().await, 0);
        assert_eq!(
            handle.connection.negotiation_state().await,
            NegotiationState::Stable
        );
        assert_eq!(handle.connection.pending_candidate_count().await, 0);

        let late = IceCandidate::new("candidate:2 1 udp 2130706431 192.168.1.20 50003 typ host")
            .with_mid("0", 0);
        assert_eq!(
            host.add_ice_candidate_to_broadcaster(late).await.unwrap(),
            CandidateDisposition::Applied
        );

        host.close_all().await;
        viewer.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_all_during_leg_setup_leaves_nothing_open() {
        for round in 0..10u64 {
            let mesh = Arc::new(mesh());
            mesh.initialize_broadcaster(FacingMode::User).await.unwrap();

            let opener = {
                let mesh = mesh.clone();
                tokio::spawn(async move { mesh.create_broadcast_offer_for("late").await })
            };
            tokio::time::sleep(std::time::Duration::from_micros(100 * round)).await;

            mesh.close_all().await;
            let opened = opener.await.unwrap();
            if let Err(e) = opened {
                assert!(matches!(e, AppError::NotInitialized(_)));
            }

            assert_eq!(mesh.open_connection_count().await, 0, "round {}", round);
            assert_eq!(mesh.fanout_count().await, 0, "round {}", round);
            assert_eq!(mesh.active_local_track_count().await, 0);
        }
    }
}
