//! Selectable media transports behind one start/stop interface

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransportKind;
use crate::engine::{EngineRole, JoinChannel, ManagedEngineAdapter, TokenClient};
use crate::error::{AppError, Result};
use crate::webrtc::media::FacingMode;
use crate::webrtc::mesh::PeerMeshEngine;
use crate::webrtc::peer::{MeshEvent, PeerKey};
use crate::webrtc::signaling::{SignalingChannel, SignalingMessage};

/// Everything a transport needs to know about the session it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportContext {
    pub session_id: String,
    pub channel_name: String,
    /// Identity of this device on the signaling channel
    pub local_id: String,
    pub host_id: String,
}

/// A media transport the controller can start in either role
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn start(&self, role: EngineRole, ctx: &TransportContext) -> Result<()>;

    /// Feed an inbound signaling message
    async fn handle_signal(&self, from: &str, message: SignalingMessage) -> Result<()>;

    /// Release everything; safe to call at any point, any number of times
    async fn stop(&self);
}

struct MeshSession {
    role: EngineRole,
    ctx: TransportContext,
    pump: CancellationToken,
}

/// Peer-mesh transport: one leg per viewer, signaling over a [`SignalingChannel`]
pub struct MeshTransport {
    mesh: Arc<PeerMeshEngine>,
    signaling: Arc<dyn SignalingChannel>,
    facing: FacingMode,
    session: Mutex<Option<MeshSession>>,
}

impl MeshTransport {
    pub fn new(
        mesh: Arc<PeerMeshEngine>,
        signaling: Arc<dyn SignalingChannel>,
        facing: FacingMode,
    ) -> Self {
        Self {
            mesh,
            signaling,
            facing,
            session: Mutex::new(None),
        }
    }

    pub fn mesh(&self) -> &Arc<PeerMeshEngine> {
        &self.mesh
    }

    fn current(&self) -> Result<(EngineRole, TransportContext)> {
        self.session
            .lock()
            .as_ref()
            .map(|s| (s.role, s.ctx.clone()))
            .ok_or_else(|| AppError::NotInitialized("mesh transport is not started".to_string()))
    }

    /// Relay local candidates to whoever is on the other end of each connection
    fn spawn_candidate_pump(&self, ctx: TransportContext) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut events = self.mesh.subscribe();
        let signaling = self.signaling.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(MeshEvent::LocalCandidate { peer, candidate }) => {
                        let target = match &peer {
                            PeerKey::BroadcastLeg(viewer_id) => viewer_id.as_str(),
                            PeerKey::Viewer(_) => ctx.host_id.as_str(),
                            // The primary connection is never bound to a viewer here
                            PeerKey::Broadcaster => continue,
                        };
                        if let Err(e) = signaling.send_ice_candidate(target, candidate).await {
                            debug!("Candidate for {} not delivered: {}", target, e);
                        }
                    }
                    Ok(MeshEvent::StateChanged { peer, state }) => {
                        debug!("Mesh {} is {}", peer, state);
                    }
                    Ok(MeshEvent::RemoteTrack { .. }) => {}
                    Err(RecvError::Lagged(n)) => warn!("Candidate pump lagged by {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Candidate pump for {} stopped", ctx.session_id);
        });

        token
    }

    async fn host_signal(&self, from: &str, message: SignalingMessage) -> Result<()> {
        match message {
            SignalingMessage::Join => {
                let offer = self.mesh.create_broadcast_offer_for(from).await?;
                self.signaling.send_offer(from, offer).await
            }
            SignalingMessage::Answer(answer) => self.mesh.handle_viewer_answer(from, answer).await,
            SignalingMessage::Candidate(candidate) => self
                .mesh
                .add_ice_candidate_from_viewer(from, candidate)
                .await
                .map(|_| ()),
            SignalingMessage::Leave => {
                self.mesh.close_fanout(from).await;
                Ok(())
            }
            SignalingMessage::Offer(_) => Err(AppError::BadRequest(format!(
                "broadcaster does not accept offers (from {})",
                from
            ))),
            SignalingMessage::Close => Ok(()),
        }
    }

    async fn viewer_signal(
        &self,
        ctx: &TransportContext,
        from: &str,
        message: SignalingMessage,
    ) -> Result<()> {
        if from != ctx.host_id {
            debug!("Ignoring {} from non-host {}", message.kind(), from);
            return Ok(());
        }

        match message {
            SignalingMessage::Offer(offer) => {
                let answer = self.mesh.create_viewer_answer(&ctx.local_id, offer).await?;
                self.signaling.send_answer(from, answer).await
            }
            SignalingMessage::Candidate(candidate) => self
                .mesh
                .add_ice_candidate_to_viewer(&ctx.local_id, candidate)
                .await
                .map(|_| ()),
            SignalingMessage::Close => {
                info!("Host closed session {}", ctx.session_id);
                self.mesh.close_viewer(&ctx.local_id).await;
                Ok(())
            }
            other => {
                debug!("Viewer ignores {} from host", other.kind());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BroadcastTransport for MeshTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mesh
    }

    async fn start(&self, role: EngineRole, ctx: &TransportContext) -> Result<()> {
        if self.session.lock().is_some() {
            return Err(AppError::AlreadyInitialized(
                "mesh transport already started".to_string(),
            ));
        }

        let pump = self.spawn_candidate_pump(ctx.clone());

        let started = match role {
            EngineRole::Broadcaster => self.mesh.initialize_broadcaster(self.facing).await.map(|_| ()),
            EngineRole::Audience => match self.mesh.initialize_viewer(&ctx.local_id).await {
                Ok(_) => self
                    .signaling
                    .send(&ctx.host_id, SignalingMessage::Join)
                    .await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = started {
            pump.cancel();
            self.mesh.close_all().await;
            return Err(e);
        }

        *self.session.lock() = Some(MeshSession {
            role,
            ctx: ctx.clone(),
            pump,
        });
        info!("Mesh transport started as {} for {}", role, ctx.session_id);
        Ok(())
    }

    async fn handle_signal(&self, from: &str, message: SignalingMessage) -> Result<()> {
        let (role, ctx) = self.current()?;
        match role {
            EngineRole::Broadcaster => self.host_signal(from, message).await,
            EngineRole::Audience => self.viewer_signal(&ctx, from, message).await,
        }
    }

    async fn stop(&self) {
        let session = self.session.lock().take();

        if let Some(session) = &session {
            session.pump.cancel();
            match session.role {
                EngineRole::Audience => {
                    let host_id = &session.ctx.host_id;
                    if let Err(e) = self.signaling.send(host_id, SignalingMessage::Leave).await {
                        debug!("Leave for {} not delivered: {}", host_id, e);
                    }
                }
                EngineRole::Broadcaster => {
                    for viewer_id in self.mesh.fanout_viewers().await {
                        if let Err(e) = self.signaling.send(&viewer_id, SignalingMessage::Close).await {
                            debug!("Close for {} not delivered: {}", viewer_id, e);
                        }
                    }
                }
            }
        }

        // Also covers connections left over from a failed start
        let report = self.mesh.close_all().await;
        if session.is_some() {
            info!(
                "Mesh transport stopped ({} closed, {} failed)",
                report.closed, report.failed
            );
        }
    }
}

/// Managed-engine transport: one engine instance, role switched per use
pub struct ManagedTransport {
    adapter: Arc<ManagedEngineAdapter>,
    tokens: Option<TokenClient>,
    role: Mutex<Option<EngineRole>>,
}

impl ManagedTransport {
    pub fn new(adapter: Arc<ManagedEngineAdapter>, tokens: Option<TokenClient>) -> Self {
        Self {
            adapter,
            tokens,
            role: Mutex::new(None),
        }
    }

    /// Build from the adapter's credentials, with a token client when configured
    pub fn from_adapter(adapter: Arc<ManagedEngineAdapter>) -> Result<Self> {
        let tokens = TokenClient::from_credentials(adapter.credentials())?;
        Ok(Self::new(adapter, tokens))
    }

    pub fn adapter(&self) -> &Arc<ManagedEngineAdapter> {
        &self.adapter
    }

    async fn join(&self, role: EngineRole, ctx: &TransportContext) -> Result<()> {
        let engine = self.adapter.get_engine(role).await?;

        let token = match &self.tokens {
            Some(client) => Some(
                client
                    .fetch_token(&ctx.channel_name, &ctx.local_id, role)
                    .await?
                    .token,
            ),
            None => None,
        };

        engine
            .join_channel(JoinChannel {
                channel: ctx.channel_name.clone(),
                token,
                uid: ctx.local_id.clone(),
            })
            .await
    }
}

#[async_trait]
impl BroadcastTransport for ManagedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Managed
    }

    async fn start(&self, role: EngineRole, ctx: &TransportContext) -> Result<()> {
        if self.role.lock().is_some() {
            return Err(AppError::AlreadyInitialized(
                "managed transport already started".to_string(),
            ));
        }

        if let Err(e) = self.join(role, ctx).await {
            self.adapter.destroy_engine().await;
            return Err(e);
        }

        *self.role.lock() = Some(role);
        info!("Managed transport started as {} on {}", role, ctx.channel_name);
        Ok(())
    }

    async fn handle_signal(&self, from: &str, message: SignalingMessage) -> Result<()> {
        if self.role.lock().is_none() {
            return Err(AppError::NotInitialized(
                "managed transport is not started".to_string(),
            ));
        }
        // The engine carries its own signaling
        debug!("Managed transport ignores {} from {}", message.kind(), from);
        Ok(())
    }

    async fn stop(&self) {
        let was_running = self.role.lock().take().is_some();
        self.adapter.destroy_engine().await;
        if was_running {
            info!("Managed transport stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::webrtc::config::WebRtcConfig;
    use crate::webrtc::media::SampleCaptureSource;
    use crate::webrtc::signaling::SignalingHub;

    fn mesh() -> Arc<PeerMeshEngine> {
        Arc::new(PeerMeshEngine::new(
            WebRtcConfig::host_only(),
            Arc::new(SampleCaptureSource::default()),
            CaptureConfig::default(),
        ))
    }

    fn ctx(local_id: &str) -> TransportContext {
        TransportContext {
            session_id: "s1".to_string(),
            channel_name: "live-host-1".to_string(),
            local_id: local_id.to_string(),
            host_id: "host".to_string(),
        }
    }

    #[tokio::test]
    async fn test_host_stop_closes_viewers() {
        let hub = SignalingHub::new();
        let host_endpoint = hub.register("host");
        let mut viewer = hub.register("v1");

        let host = MeshTransport::new(mesh(), Arc::new(host_endpoint.sender()), FacingMode::User);
        host.start(EngineRole::Broadcaster, &ctx("host")).await.unwrap();

        host.handle_signal("v1", SignalingMessage::Join).await.unwrap();
        loop {
            let envelope = viewer.recv().await.unwrap();
            match envelope.message {
                SignalingMessage::Offer(_) => break,
                SignalingMessage::Candidate(_) => continue,
                other => panic!("unexpected {}", other.kind()),
            }
        }

        host.stop().await;
        assert_eq!(host.mesh().open_connection_count().await, 0);

        // Local candidates may be queued ahead of the close
        loop {
            let envelope = viewer.recv().await.unwrap();
            assert_eq!(envelope.from, "host");
            if matches!(envelope.message, SignalingMessage::Close) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_viewer_stop_survives_absent_host() {
        let hub = SignalingHub::new();
        let host_endpoint = hub.register("host");
        let viewer_endpoint = hub.register("v1");

        let viewer = MeshTransport::new(mesh(), Arc::new(viewer_endpoint.sender()), FacingMode::User);
        viewer.start(EngineRole::Audience, &ctx("v1")).await.unwrap();

        // Host disappears before the viewer leaves
        drop(host_endpoint);
        viewer.stop().await;
        assert_eq!(viewer.mesh().open_connection_count().await, 0);
        assert!(matches!(
            viewer.handle_signal("host", SignalingMessage::Close).await,
            Err(AppError::NotInitialized(_))
        ));
    }
}
