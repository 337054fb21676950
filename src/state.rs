use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, TransportKind};
use crate::directory::SessionDirectory;
use crate::events::{EventBus, SystemEvent};
use crate::webrtc::signaling::SignalingHub;

/// Application-wide state shared across handlers
///
/// The server is the meeting point of every client: it owns the session
/// directory and relays signaling between hosts and viewers. Media never
/// passes through it.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Live-session records
    pub directory: SessionDirectory,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Offer/answer/candidate relay keyed by peer id
    pub signaling: SignalingHub,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    /// Transport clients are told to use
    transport: TransportKind,
    /// Data directory path
    data_dir: PathBuf,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        directory: SessionDirectory,
        events: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
        transport: TransportKind,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            directory,
            events,
            signaling: SignalingHub::new(),
            shutdown_tx,
            transport,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Periodically end sessions whose host went quiet
    ///
    /// Returns `None` when the sweep is disabled in the configuration.
    pub fn spawn_directory_cleanup(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let settings = self.config.get().directory.clone();
        if settings.cleanup_interval_secs == 0 {
            info!("Directory cleanup disabled");
            return None;
        }

        let state = self.clone();
        let mut shutdown = self.shutdown_signal();

        Some(tokio::spawn(async move {
            let period = Duration::from_secs(settings.cleanup_interval_secs);
            let max_idle = chrono::Duration::seconds(settings.stale_after_secs as i64);
            let mut interval = tokio::time::interval(period);

            info!(
                "Directory cleanup every {}s (stale after {}s)",
                period.as_secs(),
                settings.stale_after_secs
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {}
                }

                match state.directory.end_stale(max_idle).await {
                    Ok(ended) if !ended.is_empty() => {
                        debug!("Cleanup ended sessions: {:?}", ended);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Directory cleanup failed: {}", e);
                        state.events.publish(SystemEvent::SystemError {
                            module: "directory".to_string(),
                            severity: "warning".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            debug!("Directory cleanup task stopped");
        }))
    }
}
