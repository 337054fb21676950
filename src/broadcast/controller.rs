//! Keeps a directory record and a transport lifecycle consistent

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transport::{BroadcastTransport, TransportContext};
use crate::directory::{CreateSession, CreatedSession, JoinedSession, SessionDirectory};
use crate::engine::EngineRole;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::webrtc::signaling::SignalingMessage;

/// The session a controller is currently attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub channel_name: String,
    pub host_id: String,
    pub role: EngineRole,
}

struct Attachment {
    session: ActiveSession,
    supervisor: CancellationToken,
}

#[derive(Clone)]
struct Shared {
    directory: SessionDirectory,
    transport: Arc<dyn BroadcastTransport>,
    events: Option<Arc<EventBus>>,
    active: Arc<Mutex<Option<Attachment>>>,
}

impl Shared {
    fn publish(&self, event: SystemEvent) {
        if let Some(ref events) = self.events {
            events.publish(event);
        }
    }

    fn transport_label(&self) -> String {
        self.transport.kind().to_string()
    }

    async fn stop_transport(&self, session_id: &str) {
        self.transport.stop().await;
        self.publish(SystemEvent::TransportStopped {
            session_id: session_id.to_string(),
            transport: self.transport_label(),
        });
    }
}

/// One client's broadcast façade
///
/// Creating a record starts the transport; a fatal transport failure ends
/// the record; an ended (or vanished) record stops the transport.
pub struct BroadcastSessionController {
    local_id: String,
    shared: Shared,
}

impl BroadcastSessionController {
    pub fn new(
        local_id: impl Into<String>,
        directory: SessionDirectory,
        transport: Arc<dyn BroadcastTransport>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            shared: Shared {
                directory,
                transport,
                events: None,
                active: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.shared.events = Some(events);
        self
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn transport(&self) -> &Arc<dyn BroadcastTransport> {
        &self.shared.transport
    }

    pub async fn active_session(&self) -> Option<ActiveSession> {
        self.shared
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.session.clone())
    }

    /// Create a live record and start broadcasting on it
    pub async fn go_live(&self, mut request: CreateSession) -> Result<CreatedSession> {
        let mut active = self.shared.active.lock().await;
        ensure_detached(&active)?;

        if request.host_id.is_empty() {
            request.host_id = self.local_id.clone();
        }
        let host_id = request.host_id.clone();

        let created = self.shared.directory.create(request).await?;

        let ctx = TransportContext {
            session_id: created.session_id.clone(),
            channel_name: created.channel_name.clone(),
            local_id: self.local_id.clone(),
            host_id: host_id.clone(),
        };

        if let Err(e) = self.shared.transport.start(EngineRole::Broadcaster, &ctx).await {
            error!("Broadcast start failed for {}: {}", created.session_id, e);
            // No session stays live on a dead transport
            if let Err(end_err) = self
                .shared
                .directory
                .end(&created.session_id, Some(&host_id))
                .await
            {
                warn!("Failed to end session {}: {}", created.session_id, end_err);
            }
            self.shared.transport.stop().await;
            self.shared.publish(SystemEvent::TransportFailed {
                session_id: created.session_id.clone(),
                transport: self.shared.transport_label(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        let session = ActiveSession {
            session_id: created.session_id.clone(),
            channel_name: created.channel_name.clone(),
            host_id,
            role: EngineRole::Broadcaster,
        };
        *active = Some(self.attach(session));

        info!("Live: {} on {}", created.session_id, created.channel_name);
        Ok(created)
    }

    /// Join a live session as audience
    pub async fn join(&self, session_id: &str) -> Result<JoinedSession> {
        let mut active = self.shared.active.lock().await;
        ensure_detached(&active)?;

        let joined = self.shared.directory.join(session_id, &self.local_id).await?;

        let ctx = TransportContext {
            session_id: session_id.to_string(),
            channel_name: joined.channel_name.clone(),
            local_id: self.local_id.clone(),
            host_id: joined.session.host_id.clone(),
        };

        if let Err(e) = self.shared.transport.start(EngineRole::Audience, &ctx).await {
            warn!("Could not join {}: {}", session_id, e);
            if let Err(leave_err) = self.shared.directory.leave(session_id).await {
                warn!("Failed to release viewer slot on {}: {}", session_id, leave_err);
            }
            self.shared.transport.stop().await;
            self.shared.publish(SystemEvent::TransportFailed {
                session_id: session_id.to_string(),
                transport: self.shared.transport_label(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        let session = ActiveSession {
            session_id: session_id.to_string(),
            channel_name: joined.channel_name.clone(),
            host_id: ctx.host_id,
            role: EngineRole::Audience,
        };
        *active = Some(self.attach(session));

        Ok(joined)
    }

    /// Forward a signaling message to the running transport
    ///
    /// Errors concern only the peer the message came from.
    pub async fn handle_signal(&self, from: &str, message: SignalingMessage) -> Result<()> {
        if self.shared.active.lock().await.is_none() {
            return Err(AppError::NotInitialized(
                "no active broadcast session".to_string(),
            ));
        }
        self.shared.transport.handle_signal(from, message).await
    }

    /// Detach from the current session
    ///
    /// A viewer gives back its slot; a host leaving ends the session.
    pub async fn leave(&self) -> Result<()> {
        let attachment = {
            let mut active = self.shared.active.lock().await;
            let attachment = active.take();
            if let Some(ref a) = attachment {
                a.supervisor.cancel();
            }
            attachment
        };
        let Some(attachment) = attachment else {
            return Ok(());
        };
        let session = attachment.session;

        self.shared.stop_transport(&session.session_id).await;

        match session.role {
            EngineRole::Audience => self.shared.directory.leave(&session.session_id).await,
            EngineRole::Broadcaster => {
                self.shared
                    .directory
                    .end(&session.session_id, Some(&self.local_id))
                    .await
            }
        }
    }

    /// End the hosted session
    pub async fn end(&self) -> Result<()> {
        let mut active = self.shared.active.lock().await;
        let Some(attachment) = active.as_ref() else {
            return Ok(());
        };
        if attachment.session.role != EngineRole::Broadcaster {
            return Err(AppError::BadRequest(
                "only the host can end a session".to_string(),
            ));
        }

        let Some(attachment) = active.take() else {
            return Ok(());
        };
        attachment.supervisor.cancel();
        drop(active);

        let session_id = attachment.session.session_id;
        self.shared.stop_transport(&session_id).await;
        self.shared
            .directory
            .end(&session_id, Some(&self.local_id))
            .await
    }

    fn attach(&self, session: ActiveSession) -> Attachment {
        let supervisor = CancellationToken::new();
        spawn_supervisor(self.shared.clone(), session.session_id.clone(), supervisor.clone());
        self.shared.publish(SystemEvent::TransportStarted {
            session_id: session.session_id.clone(),
            role: session.role.to_string(),
            transport: self.shared.transport_label(),
        });
        Attachment {
            session,
            supervisor,
        }
    }
}

fn ensure_detached(active: &Option<Attachment>) -> Result<()> {
    match active {
        Some(attachment) => Err(AppError::AlreadyInitialized(format!(
            "already attached to session {}",
            attachment.session.session_id
        ))),
        None => Ok(()),
    }
}

/// Stop the transport once the record stops being live
fn spawn_supervisor(shared: Shared, session_id: String, token: CancellationToken) {
    let mut watch = shared.directory.watch(&session_id);

    tokio::spawn(async move {
        loop {
            let snapshot = tokio::select! {
                _ = token.cancelled() => break,
                snapshot = watch.next() => snapshot,
            };

            match snapshot {
                Some(Some(record)) if record.is_live() => continue,
                Some(record) => {
                    let mut active = shared.active.lock().await;
                    // Detached meanwhile; the detaching call owns teardown
                    let attached = active
                        .as_ref()
                        .is_some_and(|a| a.session.session_id == session_id);
                    if token.is_cancelled() || !attached {
                        break;
                    }
                    info!(
                        "Session {} is {}; stopping transport",
                        session_id,
                        record.map_or("gone".to_string(), |r| r.status.to_string())
                    );
                    active.take();
                    shared.stop_transport(&session_id).await;
                    break;
                }
                None => break,
            }
        }
        watch.cancel();
        debug!("Supervisor for {} finished", session_id);
    });
}
