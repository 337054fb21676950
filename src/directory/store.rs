use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::subscription::{
    DirectorySubscription, LiveListSubscription, SessionWatch, SUBSCRIPTION_BUFFER,
};
use super::types::{
    channel_name_for, format_timestamp, parse_timestamp, ChangeKind, CreateSession,
    CreatedSession, DirectoryChange, JoinedSession, LiveSession,
};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Change channel capacity; subscribers that lag simply re-query
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// `ended_by` recorded by directory-side cleanup
pub const SYSTEM_ENDED_BY: &str = "system";

const SESSION_COLUMNS: &str = "id, title, channel_name, host_id, host_name, cover_url, status, \
     viewers_count, created_at, updated_at, ended_at, ended_by, signaling";

#[derive(FromRow)]
struct SessionRow {
    id: String,
    title: String,
    channel_name: String,
    host_id: String,
    host_name: Option<String>,
    cover_url: Option<String>,
    status: String,
    viewers_count: i64,
    created_at: String,
    updated_at: String,
    ended_at: Option<String>,
    ended_by: Option<String>,
    signaling: String,
}

impl TryFrom<SessionRow> for LiveSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self> {
        let created_at = parse_timestamp(&row.created_at).unwrap_or_else(Utc::now);
        Ok(LiveSession {
            status: row.status.parse()?,
            viewers_count: row.viewers_count.max(0),
            updated_at: parse_timestamp(&row.updated_at).unwrap_or(created_at),
            created_at,
            ended_at: row.ended_at.as_deref().and_then(parse_timestamp),
            signaling: serde_json::from_str(&row.signaling)
                .unwrap_or_else(|_| serde_json::json!({})),
            id: row.id,
            title: row.title,
            channel_name: row.channel_name,
            host_id: row.host_id,
            host_name: row.host_name,
            cover_url: row.cover_url,
            ended_by: row.ended_by,
        })
    }
}

/// Directory of live-session records backed by SQLite
///
/// Viewer counting is done with single-statement deltas inside the store so
/// concurrent joins and leaves never lose updates.
#[derive(Clone)]
pub struct SessionDirectory {
    pool: Pool<Sqlite>,
    change_tx: broadcast::Sender<DirectoryChange>,
    events: Option<Arc<EventBus>>,
}

impl SessionDirectory {
    /// Create the directory on `pool`, initializing the schema
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self> {
        Self::init_schema(&pool).await?;
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            pool,
            change_tx,
            events: None,
        })
    }

    /// Also publish directory events on the shared event bus
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS live_streams (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                channel_name TEXT NOT NULL,
                host_id TEXT NOT NULL,
                host_name TEXT,
                cover_url TEXT,
                status TEXT NOT NULL CHECK (status IN ('draft', 'live', 'ended')),
                viewers_count INTEGER NOT NULL DEFAULT 0 CHECK (viewers_count >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                ended_at TEXT,
                ended_by TEXT,
                signaling TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_live_streams_status_created \
             ON live_streams (status, created_at DESC)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn notify(&self, session_id: &str, kind: ChangeKind) {
        let _ = self.change_tx.send(DirectoryChange {
            session_id: session_id.to_string(),
            kind,
        });
    }

    fn publish(&self, event: SystemEvent) {
        if let Some(ref events) = self.events {
            events.publish(event);
        }
    }

    /// Subscribe to raw change notifications
    pub fn changes(&self) -> broadcast::Receiver<DirectoryChange> {
        self.change_tx.subscribe()
    }

    /// Create a live session record for a host
    pub async fn create(&self, request: CreateSession) -> Result<CreatedSession> {
        if request.host_id.trim().is_empty() {
            return Err(AppError::BadRequest("host id must not be empty".to_string()));
        }
        if request.title.trim().is_empty() {
            return Err(AppError::BadRequest("title must not be empty".to_string()));
        }

        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let channel_name = channel_name_for(&request.host_id, now);
        let ts = format_timestamp(now);

        sqlx::query(
            r#"
            INSERT INTO live_streams
                (id, title, channel_name, host_id, host_name, cover_url, status,
                 viewers_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'live', 0, ?7, ?7)
            "#,
        )
        .bind(&session_id)
        .bind(request.title.trim())
        .bind(&channel_name)
        .bind(&request.host_id)
        .bind(&request.host_name)
        .bind(&request.cover_url)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        info!(
            "Live session created: {} (host {}, channel {})",
            session_id, request.host_id, channel_name
        );

        self.notify(&session_id, ChangeKind::Created);
        self.publish(SystemEvent::SessionCreated {
            session_id: session_id.clone(),
            channel_name: channel_name.clone(),
            host_id: request.host_id.clone(),
            title: request.title.trim().to_string(),
        });

        Ok(CreatedSession {
            session_id,
            channel_name,
        })
    }

    /// Get a session by id
    pub async fn get(&self, session_id: &str) -> Result<LiveSession> {
        self.find(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Live session not found: {}", session_id)))
    }

    /// Get a session by id, `None` when absent
    pub async fn find(&self, session_id: &str) -> Result<Option<LiveSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM live_streams WHERE id = ?1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LiveSession::try_from).transpose()
    }

    /// One-shot list of live sessions, newest first
    pub async fn snapshot_live(&self) -> Result<Vec<LiveSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM live_streams WHERE status = 'live' \
             ORDER BY created_at DESC, rowid DESC",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LiveSession::try_from).collect()
    }

    /// Continuously updated list of live sessions
    ///
    /// The current snapshot is delivered first, then a fresh one after every
    /// directory change until the subscription is cancelled or dropped.
    pub fn list_live(&self) -> LiveListSubscription {
        // Subscribe before the first query so no change slips in between
        let mut changes = self.change_tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let directory = self.clone();

        tokio::spawn(async move {
            loop {
                match directory.snapshot_live().await {
                    Ok(snapshot) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            sent = tx.send(snapshot) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("Live list snapshot failed: {}", e),
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Live list subscription finished");
        });

        DirectorySubscription::new(rx, cancel)
    }

    /// Listen to a single session record
    pub fn watch(&self, session_id: &str) -> SessionWatch {
        let mut changes = self.change_tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let directory = self.clone();
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            loop {
                match directory.find(&session_id).await {
                    Ok(snapshot) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            sent = tx.send(snapshot) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("Session {} snapshot failed: {}", session_id, e),
                }

                // Wait for a change touching this session
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        change = changes.recv() => match change {
                            Ok(change) if change.session_id == session_id => break,
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => break,
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                    }
                }
            }
        });

        DirectorySubscription::new(rx, cancel)
    }

    /// Register a viewer: atomically increments the viewer count
    pub async fn join(&self, session_id: &str, viewer_id: &str) -> Result<JoinedSession> {
        let now = format_timestamp(Utc::now());
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE live_streams SET viewers_count = viewers_count + 1, updated_at = ?2 \
             WHERE id = ?1 AND status = 'live' RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        let session = match row {
            Some(row) => LiveSession::try_from(row)?,
            None => {
                return match self.find(session_id).await? {
                    None => Err(AppError::NotFound(format!(
                        "Live session not found: {}",
                        session_id
                    ))),
                    Some(existing) => Err(AppError::NoLongerActive(format!(
                        "Live session {} is {}",
                        session_id, existing.status
                    ))),
                };
            }
        };

        debug!(
            "Viewer {} joined {} ({} watching)",
            viewer_id, session_id, session.viewers_count
        );

        self.notify(session_id, ChangeKind::Joined);
        self.publish(SystemEvent::ViewerJoined {
            session_id: session_id.to_string(),
            viewers_count: session.viewers_count,
        });

        Ok(JoinedSession {
            channel_name: session.channel_name.clone(),
            session,
        })
    }

    /// Unregister a viewer; the count never drops below zero
    pub async fn leave(&self, session_id: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let remaining: Option<(i64,)> = sqlx::query_as(
            "UPDATE live_streams SET viewers_count = MAX(viewers_count - 1, 0), updated_at = ?2 \
             WHERE id = ?1 RETURNING viewers_count",
        )
        .bind(session_id)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        match remaining {
            Some((viewers_count,)) => {
                debug!("Viewer left {} ({} watching)", session_id, viewers_count);
                self.notify(session_id, ChangeKind::Left);
                self.publish(SystemEvent::ViewerLeft {
                    session_id: session_id.to_string(),
                    viewers_count,
                });
            }
            None => debug!("Leave for unknown session {} ignored", session_id),
        }

        Ok(())
    }

    /// End a session; ending an already-ended session changes nothing
    pub async fn end(&self, session_id: &str, ended_by: Option<&str>) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE live_streams SET status = 'ended', ended_at = ?2, ended_by = ?3, updated_at = ?2 \
             WHERE id = ?1 AND status != 'ended'",
        )
        .bind(session_id)
        .bind(&now)
        .bind(ended_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Session {} already ended or absent", session_id);
            return Ok(());
        }

        info!(
            "Live session ended: {} (by {})",
            session_id,
            ended_by.unwrap_or("unknown")
        );

        self.notify(session_id, ChangeKind::Ended);
        self.publish(SystemEvent::SessionEnded {
            session_id: session_id.to_string(),
            ended_by: ended_by.map(str::to_string),
        });

        Ok(())
    }

    /// Host keep-alive; refreshes `updated_at` of a live session
    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE live_streams SET updated_at = ?2 WHERE id = ?1 AND status = 'live'",
        )
        .bind(session_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing record from an ended one
            let session = self.get(session_id).await?;
            return Err(AppError::NoLongerActive(format!(
                "Live session {} is {}",
                session_id, session.status
            )));
        }

        Ok(())
    }

    /// Store the opaque signaling object for a session
    pub async fn set_signaling(&self, session_id: &str, signaling: &serde_json::Value) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE live_streams SET signaling = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(session_id)
        .bind(serde_json::to_string(signaling)?)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Live session not found: {}",
                session_id
            )));
        }

        self.notify(session_id, ChangeKind::Updated);
        Ok(())
    }

    /// End live sessions whose host stopped sending heartbeats
    ///
    /// Returns the ids that were ended.
    pub async fn end_stale(&self, max_idle: Duration) -> Result<Vec<String>> {
        self.end_stale_before(Utc::now() - max_idle).await
    }

    async fn end_stale_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let stale: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM live_streams WHERE status = 'live' AND updated_at < ?1",
        )
        .bind(format_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;

        let mut ended = Vec::with_capacity(stale.len());
        for (id,) in stale {
            self.end(&id, Some(SYSTEM_ENDED_BY)).await?;
            ended.push(id);
        }

        if !ended.is_empty() {
            info!("Ended {} stale live session(s)", ended.len());
        }

        Ok(ended)
    }

    /// Number of sessions currently live
    pub async fn live_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM live_streams WHERE status = 'live'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::types::SessionStatus;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration as StdDuration;
    use tempfile::{tempdir, TempDir};

    async fn directory() -> (SessionDirectory, TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("live.db").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .unwrap();
        (SessionDirectory::new(pool).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_movie_night_scenario() {
        let (directory, _dir) = directory().await;

        let created = directory
            .create(CreateSession::new("h1", "Movie Night"))
            .await
            .unwrap();
        assert!(created.channel_name.starts_with("live-h1-"));

        let session = directory.get(&created.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Live);
        assert_eq!(session.viewers_count, 0);
        assert_eq!(session.title, "Movie Night");

        let joined = directory.join(&created.session_id, "v1").await.unwrap();
        assert_eq!(joined.session.viewers_count, 1);
        assert_eq!(joined.channel_name, created.channel_name);

        directory.leave(&created.session_id).await.unwrap();
        assert_eq!(
            directory.get(&created.session_id).await.unwrap().viewers_count,
            0
        );

        directory.end(&created.session_id, Some("h1")).await.unwrap();
        let err = directory.join(&created.session_id, "v2").await.unwrap_err();
        assert!(matches!(err, AppError::NoLongerActive(_)));
    }

    #[tokio::test]
    async fn test_join_unknown_session_is_not_found() {
        let (directory, _dir) = directory().await;
        let err = directory.join("missing", "v1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(matches!(
            directory.get("missing").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_join_ended_session_does_not_mutate_count() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Quiet"))
            .await
            .unwrap();
        directory.join(&created.session_id, "v1").await.unwrap();
        directory.end(&created.session_id, None).await.unwrap();

        for viewer in ["v2", "v3"] {
            let err = directory.join(&created.session_id, viewer).await.unwrap_err();
            assert!(matches!(err, AppError::NoLongerActive(_)));
        }
        assert_eq!(
            directory.get(&created.session_id).await.unwrap().viewers_count,
            1
        );
    }

    #[tokio::test]
    async fn test_viewer_count_never_negative() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Counts"))
            .await
            .unwrap();
        let id = &created.session_id;

        // join, leave, leave, leave, join, join, leave
        let script = [true, false, false, false, true, true, false];
        let mut expected: i64 = 0;
        for join in script {
            if join {
                directory.join(id, "v").await.unwrap();
                expected += 1;
            } else {
                directory.leave(id).await.unwrap();
                expected = (expected - 1).max(0);
            }
            let count = directory.get(id).await.unwrap().viewers_count;
            assert!(count >= 0);
            assert_eq!(count, expected);
        }

        // Leaving an absent record is a no-op
        directory.leave("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_joins_are_atomic() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Busy"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let directory = directory.clone();
            let id = created.session_id.clone();
            handles.push(tokio::spawn(async move {
                directory.join(&id, &format!("v{}", i)).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            directory.get(&created.session_id).await.unwrap().viewers_count,
            16
        );
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Once"))
            .await
            .unwrap();

        directory.end(&created.session_id, Some("h1")).await.unwrap();
        let first = directory.get(&created.session_id).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        directory.end(&created.session_id, Some("someone-else")).await.unwrap();
        let second = directory.get(&created.session_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.status, SessionStatus::Ended);
        assert_eq!(second.ended_by.as_deref(), Some("h1"));
        assert!(second.ended_at.is_some());

        // Ending an absent record is harmless too
        directory.end("missing", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_live_updates_and_cancellation() {
        let (directory, _dir) = directory().await;
        let mut sub = directory.list_live();

        assert!(sub.next().await.unwrap().is_empty());

        let first = directory
            .create(CreateSession::new("h1", "First"))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let second = directory
            .create(CreateSession::new("h2", "Second"))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap();
        let ids: Vec<_> = snapshot.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![second.session_id.clone(), first.session_id.clone()]);

        directory.end(&first.session_id, None).await.unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, second.session_id);

        sub.cancel();
        directory
            .create(CreateSession::new("h3", "Third"))
            .await
            .unwrap();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_single_session() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Watched"))
            .await
            .unwrap();
        let other = directory
            .create(CreateSession::new("h2", "Other"))
            .await
            .unwrap();

        let mut watch = directory.watch(&created.session_id);
        let initial = watch.next().await.unwrap().unwrap();
        assert_eq!(initial.viewers_count, 0);

        // Changes to other sessions are not delivered
        directory.join(&other.session_id, "v9").await.unwrap();
        directory.join(&created.session_id, "v1").await.unwrap();
        let updated = watch.next().await.unwrap().unwrap();
        assert_eq!(updated.viewers_count, 1);

        directory.end(&created.session_id, Some("h1")).await.unwrap();
        let ended = watch.next().await.unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        let mut missing = directory.watch("missing");
        assert_eq!(missing.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_end_stale_sessions() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Forgotten"))
            .await
            .unwrap();

        // Nothing is older than an hour
        assert!(directory
            .end_stale(Duration::hours(1))
            .await
            .unwrap()
            .is_empty());

        let ended = directory
            .end_stale_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(ended, vec![created.session_id.clone()]);

        let session = directory.get(&created.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
        assert_eq!(session.ended_by.as_deref(), Some(SYSTEM_ENDED_BY));
        assert_eq!(directory.live_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_and_signaling() {
        let (directory, _dir) = directory().await;
        let created = directory
            .create(CreateSession::new("h1", "Beating"))
            .await
            .unwrap();

        directory.heartbeat(&created.session_id).await.unwrap();
        directory
            .set_signaling(&created.session_id, &serde_json::json!({"hub": "ws"}))
            .await
            .unwrap();
        let session = directory.get(&created.session_id).await.unwrap();
        assert_eq!(session.signaling["hub"], "ws");

        directory.end(&created.session_id, None).await.unwrap();
        assert!(matches!(
            directory.heartbeat(&created.session_id).await.unwrap_err(),
            AppError::NoLongerActive(_)
        ));
        assert!(matches!(
            directory.heartbeat("missing").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_fields() {
        let (directory, _dir) = directory().await;
        assert!(matches!(
            directory.create(CreateSession::new(" ", "t")).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            directory.create(CreateSession::new("h1", "")).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_events_published() {
        let (directory, _dir) = directory().await;
        let bus = Arc::new(EventBus::new());
        let directory = directory.with_events(bus.clone());
        let mut rx = bus.subscribe();

        let created = directory
            .create(CreateSession::new("h1", "Evented"))
            .await
            .unwrap();
        directory.join(&created.session_id, "v1").await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::SessionCreated { .. }
        ));
        match rx.recv().await.unwrap() {
            SystemEvent::ViewerJoined { viewers_count, .. } => assert_eq!(viewers_count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
