use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Lifecycle status of a live session record
///
/// Transitions only move forward: draft -> live -> ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Draft,
    Live,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Live => "live",
            SessionStatus::Ended => "ended",
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        next >= *self
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SessionStatus::Draft),
            "live" => Ok(SessionStatus::Live),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(AppError::Internal(format!(
                "Unknown session status in store: {}",
                other
            ))),
        }
    }
}

/// One live broadcast record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    pub id: String,
    pub title: String,
    pub channel_name: String,
    pub host_id: String,
    pub host_name: Option<String>,
    pub cover_url: Option<String>,
    pub status: SessionStatus,
    pub viewers_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<String>,
    /// Opaque object owned by the signaling collaborator
    pub signaling: serde_json::Value,
}

impl LiveSession {
    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Live
    }
}

/// Host request to go live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub host_id: String,
    #[serde(default)]
    pub host_name: Option<String>,
    pub title: String,
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl CreateSession {
    pub fn new(host_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Result of [`SessionDirectory::create`](super::SessionDirectory::create)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub channel_name: String,
}

/// Result of [`SessionDirectory::join`](super::SessionDirectory::join)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedSession {
    pub session: LiveSession,
    pub channel_name: String,
}

/// Kind of mutation applied to the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Joined,
    Left,
    Ended,
    Updated,
}

/// Change notification fanned out to directory subscriptions
#[derive(Debug, Clone)]
pub struct DirectoryChange {
    pub session_id: String,
    pub kind: ChangeKind,
}

/// Routing token for the transport layer: `live-<hostId>-<millis>`
pub fn channel_name_for(host_id: &str, now: DateTime<Utc>) -> String {
    format!("live-{}-{}", host_id, now.timestamp_millis())
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
