//! In-process engine backed by a local capture source

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::{EngineRole, EngineStatus, JoinChannel, RtcEngine, RtcEngineFactory};
use crate::config::{CaptureConfig, EngineCredentials};
use crate::error::{AppError, Result};
use crate::webrtc::media::{CaptureConstraints, CaptureSource, FacingMode, LocalMediaStream};

#[derive(Default)]
struct EngineState {
    status: EngineStatus,
    preview: Option<LocalMediaStream>,
}

/// Engine that owns its capture stream and tracks role/channel state
pub struct LocalEngine {
    app_id: String,
    capture: Arc<dyn CaptureSource>,
    constraints: CaptureConstraints,
    state: Mutex<EngineState>,
}

impl LocalEngine {
    pub fn new(
        app_id: impl Into<String>,
        capture: Arc<dyn CaptureSource>,
        constraints: CaptureConstraints,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            capture,
            constraints,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state.lock().status.released {
            return Err(AppError::NotInitialized(
                "engine has been released".to_string(),
            ));
        }
        Ok(())
    }

    /// Live tracks held by the preview stream
    pub fn active_track_count(&self) -> usize {
        self.state
            .lock()
            .preview
            .as_ref()
            .map_or(0, |stream| stream.live_track_count())
    }
}

#[async_trait]
impl RtcEngine for LocalEngine {
    async fn enable_audio(&self) -> Result<()> {
        self.ensure_usable()?;
        self.state.lock().status.audio_enabled = true;
        Ok(())
    }

    async fn enable_video(&self) -> Result<()> {
        self.ensure_usable()?;
        self.state.lock().status.video_enabled = true;
        Ok(())
    }

    async fn start_preview(&self) -> Result<()> {
        self.ensure_usable()?;
        if self.state.lock().status.preview_running {
            return Ok(());
        }

        // Acquire outside the lock; capture may suspend
        let stream = self.capture.acquire(&self.constraints).await?;

        let mut state = self.state.lock();
        if state.status.preview_running || state.status.released {
            stream.stop();
            return Ok(());
        }
        stream.set_video_muted(state.status.local_video_muted);
        state.preview = Some(stream);
        state.status.preview_running = true;
        info!("Engine preview started ({})", self.constraints.facing);
        Ok(())
    }

    async fn stop_preview(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stream) = state.preview.take() {
            stream.stop();
        }
        state.status.preview_running = false;
        Ok(())
    }

    async fn mute_local_video(&self, muted: bool) -> Result<()> {
        self.ensure_usable()?;
        let mut state = self.state.lock();
        state.status.local_video_muted = muted;
        if let Some(stream) = state.preview.as_ref() {
            stream.set_video_muted(muted);
        }
        debug!("Engine local video muted: {}", muted);
        Ok(())
    }

    async fn set_client_role(&self, role: EngineRole) -> Result<()> {
        self.ensure_usable()?;
        self.state.lock().status.role = Some(role);
        debug!("Engine client role: {}", role);
        Ok(())
    }

    async fn join_channel(&self, join: JoinChannel) -> Result<()> {
        self.ensure_usable()?;
        if join.channel.trim().is_empty() {
            return Err(AppError::BadRequest("channel name is empty".to_string()));
        }
        let mut state = self.state.lock();
        info!("Engine joined channel {} as {}", join.channel, join.uid);
        state.status.channel = Some(join.channel);
        Ok(())
    }

    async fn leave_channel(&self) -> Result<()> {
        if let Some(channel) = self.state.lock().status.channel.take() {
            info!("Engine left channel {}", channel);
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stream) = state.preview.take() {
            stream.stop();
        }
        state.status = EngineStatus {
            released: true,
            ..Default::default()
        };
        info!("Engine released");
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        self.state.lock().status.clone()
    }
}

/// Factory producing [`LocalEngine`] instances
pub struct LocalEngineFactory {
    capture: Arc<dyn CaptureSource>,
    capture_config: CaptureConfig,
}

impl LocalEngineFactory {
    pub fn new(capture: Arc<dyn CaptureSource>, capture_config: CaptureConfig) -> Self {
        Self {
            capture,
            capture_config,
        }
    }
}

#[async_trait]
impl RtcEngineFactory for LocalEngineFactory {
    async fn create(&self, credentials: &EngineCredentials) -> Result<Arc<dyn RtcEngine>> {
        let facing: FacingMode = self.capture_config.facing;
        let constraints = CaptureConstraints::from_config(&self.capture_config, facing);
        info!("Creating local engine for app {}", credentials.app_id);
        Ok(Arc::new(LocalEngine::new(
            credentials.app_id.clone(),
            self.capture.clone(),
            constraints,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::media::SampleCaptureSource;

    fn engine() -> LocalEngine {
        LocalEngine::new(
            "app",
            Arc::new(SampleCaptureSource::default()),
            CaptureConstraints::for_facing(FacingMode::User),
        )
    }

    #[tokio::test]
    async fn test_preview_owns_tracks_until_stopped() {
        let engine = engine();
        engine.start_preview().await.unwrap();
        engine.start_preview().await.unwrap();
        assert!(engine.status().preview_running);
        assert_eq!(engine.active_track_count(), 2);

        engine.stop_preview().await.unwrap();
        assert_eq!(engine.active_track_count(), 0);
        assert!(!engine.status().preview_running);
    }

    #[tokio::test]
    async fn test_release_makes_engine_unusable() {
        let engine = engine();
        engine.start_preview().await.unwrap();
        engine
            .join_channel(JoinChannel {
                channel: "live-h1-1".into(),
                token: None,
                uid: "h1".into(),
            })
            .await
            .unwrap();
        assert_eq!(engine.status().channel.as_deref(), Some("live-h1-1"));

        engine.release().await.unwrap();
        let status = engine.status();
        assert!(status.released);
        assert!(status.channel.is_none());
        assert_eq!(engine.active_track_count(), 0);
        assert!(matches!(
            engine.enable_video().await,
            Err(AppError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_preview_denied() {
        let engine = LocalEngine::new(
            "app",
            Arc::new(SampleCaptureSource::denied()),
            CaptureConstraints::for_facing(FacingMode::User),
        );
        assert!(matches!(
            engine.start_preview().await,
            Err(AppError::PermissionDenied(_))
        ));
        assert!(!engine.status().preview_running);
    }
}
