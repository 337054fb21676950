//! Single-instance guard around the managed engine

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{EngineRole, RtcEngine, RtcEngineFactory};
use crate::config::EngineCredentials;
use crate::error::{AppError, Result};

/// Owns at most one engine instance and switches its role
///
/// Creation runs under an async mutex, so concurrent callers of
/// [`ensure_engine`](Self::ensure_engine) wait for the same instance instead
/// of creating their own.
pub struct ManagedEngineAdapter {
    credentials: EngineCredentials,
    factory: Arc<dyn RtcEngineFactory>,
    engine: Mutex<Option<Arc<dyn RtcEngine>>>,
    current_role: RwLock<Option<EngineRole>>,
}

impl ManagedEngineAdapter {
    pub fn new(credentials: EngineCredentials, factory: Arc<dyn RtcEngineFactory>) -> Self {
        Self {
            credentials,
            factory,
            engine: Mutex::new(None),
            current_role: RwLock::new(None),
        }
    }

    pub fn credentials(&self) -> &EngineCredentials {
        &self.credentials
    }

    /// Get the engine, creating it on first use
    pub async fn ensure_engine(&self) -> Result<Arc<dyn RtcEngine>> {
        let mut guard = self.engine.lock().await;

        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }

        // Nothing is acquired before this check
        self.credentials.validate()?;

        info!("Creating managed engine");
        let engine = self.factory.create(&self.credentials).await?;

        let enabled = async {
            engine.enable_audio().await?;
            engine.enable_video().await
        }
        .await;
        if let Err(e) = enabled {
            warn!("Engine capability setup failed: {}", e);
            if let Err(release_err) = engine.release().await {
                warn!(
                    "{}",
                    AppError::transport_teardown("managed-engine", release_err)
                );
            }
            return Err(e);
        }

        *guard = Some(engine.clone());
        Ok(engine)
    }

    /// Get the engine switched into `role`
    pub async fn get_engine(&self, role: EngineRole) -> Result<Arc<dyn RtcEngine>> {
        let engine = self.ensure_engine().await?;

        engine.set_client_role(role).await?;
        match role {
            EngineRole::Broadcaster => {
                engine.enable_video().await?;
                engine.start_preview().await?;
                engine.mute_local_video(false).await?;
            }
            EngineRole::Audience => {
                engine.mute_local_video(true).await?;
            }
        }

        *self.current_role.write() = Some(role);
        debug!("Managed engine role: {}", role);
        Ok(engine)
    }

    pub fn current_role(&self) -> Option<EngineRole> {
        *self.current_role.read()
    }

    pub async fn has_engine(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    /// Leave, release and forget the engine; failures are logged only
    pub async fn destroy_engine(&self) {
        let engine = self.engine.lock().await.take();
        *self.current_role.write() = None;

        let Some(engine) = engine else {
            return;
        };

        if let Err(e) = engine.leave_channel().await {
            warn!("{}", AppError::transport_teardown("managed-engine/leave", e));
        }
        if let Err(e) = engine.release().await {
            warn!("{}", AppError::transport_teardown("managed-engine/release", e));
        }
        info!("Managed engine destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::engine::local::LocalEngineFactory;
    use crate::engine::{EngineStatus, JoinChannel};
    use crate::webrtc::media::SampleCaptureSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts creations and can fail teardown
    struct CountingFactory {
        inner: LocalEngineFactory,
        created: AtomicUsize,
        failing_release: bool,
    }

    impl CountingFactory {
        fn new(failing_release: bool) -> Self {
            Self {
                inner: LocalEngineFactory::new(
                    Arc::new(SampleCaptureSource::default()),
                    CaptureConfig::default(),
                ),
                created: AtomicUsize::new(0),
                failing_release,
            }
        }
    }

    struct FailingRelease(Arc<dyn RtcEngine>);

    #[async_trait]
    impl RtcEngine for FailingRelease {
        async fn enable_audio(&self) -> Result<()> {
            self.0.enable_audio().await
        }
        async fn enable_video(&self) -> Result<()> {
            self.0.enable_video().await
        }
        async fn start_preview(&self) -> Result<()> {
            self.0.start_preview().await
        }
        async fn stop_preview(&self) -> Result<()> {
            self.0.stop_preview().await
        }
        async fn mute_local_video(&self, muted: bool) -> Result<()> {
            self.0.mute_local_video(muted).await
        }
        async fn set_client_role(&self, role: EngineRole) -> Result<()> {
            self.0.set_client_role(role).await
        }
        async fn join_channel(&self, join: JoinChannel) -> Result<()> {
            self.0.join_channel(join).await
        }
        async fn leave_channel(&self) -> Result<()> {
            Err(AppError::Internal("leave timed out".into()))
        }
        async fn release(&self) -> Result<()> {
            Err(AppError::Internal("native release failed".into()))
        }
        fn status(&self) -> EngineStatus {
            self.0.status()
        }
    }

    #[async_trait]
    impl RtcEngineFactory for CountingFactory {
        async fn create(&self, credentials: &EngineCredentials) -> Result<Arc<dyn RtcEngine>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            // Widen the race window
            tokio::time::sleep(Duration::from_millis(20)).await;
            let engine = self.inner.create(credentials).await?;
            if self.failing_release {
                Ok(Arc::new(FailingRelease(engine)))
            } else {
                Ok(engine)
            }
        }
    }

    fn adapter(factory: Arc<CountingFactory>) -> Arc<ManagedEngineAdapter> {
        Arc::new(ManagedEngineAdapter::new(
            EngineCredentials::new("test-app"),
            factory,
        ))
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let factory = Arc::new(CountingFactory::new(false));
        let adapter = adapter(factory.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adapter = adapter.clone();
                tokio::spawn(async move { adapter.ensure_engine().await.unwrap() })
            })
            .collect();

        let mut engines = Vec::new();
        for handle in handles {
            engines.push(handle.await.unwrap());
        }

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        let status = engines[0].status();
        assert!(status.audio_enabled && status.video_enabled);
    }

    #[tokio::test]
    async fn test_missing_app_id_fails_before_creation() {
        let factory = Arc::new(CountingFactory::new(false));
        let adapter = ManagedEngineAdapter::new(EngineCredentials::default(), factory.clone());

        assert!(matches!(
            adapter.ensure_engine().await,
            Err(AppError::MisconfiguredCredentials(_))
        ));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert!(!adapter.has_engine().await);
    }

    #[tokio::test]
    async fn test_role_switching() {
        let adapter = adapter(Arc::new(CountingFactory::new(false)));

        let engine = adapter.get_engine(EngineRole::Audience).await.unwrap();
        assert!(engine.status().local_video_muted);
        assert_eq!(adapter.current_role(), Some(EngineRole::Audience));

        let engine = adapter.get_engine(EngineRole::Broadcaster).await.unwrap();
        let status = engine.status();
        assert!(status.video_enabled);
        assert!(status.preview_running);
        assert!(!status.local_video_muted);
        assert_eq!(status.role, Some(EngineRole::Broadcaster));

        let engine = adapter.get_engine(EngineRole::Audience).await.unwrap();
        assert!(engine.status().local_video_muted);
    }

    #[tokio::test]
    async fn test_destroy_always_clears_handle() {
        let factory = Arc::new(CountingFactory::new(true));
        let adapter = adapter(factory.clone());

        // No engine yet: no-op
        adapter.destroy_engine().await;
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        adapter.get_engine(EngineRole::Broadcaster).await.unwrap();
        adapter.destroy_engine().await;
        assert!(!adapter.has_engine().await);
        assert_eq!(adapter.current_role(), None);

        adapter.ensure_engine().await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }
}
