//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// Tagged with the event name for serialization:
/// ```json
/// {
///   "event": "live.viewer_joined",
///   "data": { "session_id": "…", "viewers_count": 3 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Session Directory Events
    // ============================================================================
    /// A host went live
    #[serde(rename = "live.session_created")]
    SessionCreated {
        session_id: String,
        channel_name: String,
        host_id: String,
        title: String,
    },

    /// A viewer joined; carries the post-increment count
    #[serde(rename = "live.viewer_joined")]
    ViewerJoined {
        session_id: String,
        viewers_count: i64,
    },

    /// A viewer left; carries the floored count
    #[serde(rename = "live.viewer_left")]
    ViewerLeft {
        session_id: String,
        viewers_count: i64,
    },

    /// A session reached its terminal state
    #[serde(rename = "live.session_ended")]
    SessionEnded {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ended_by: Option<String>,
    },

    // ============================================================================
    // Transport Events
    // ============================================================================
    /// A transport started in the given role
    #[serde(rename = "transport.started")]
    TransportStarted {
        session_id: String,
        /// "broadcaster" or "audience"
        role: String,
        /// "mesh" or "managed"
        transport: String,
    },

    /// A transport was torn down
    #[serde(rename = "transport.stopped")]
    TransportStopped {
        session_id: String,
        transport: String,
    },

    /// A transport hit a fatal error; the session record has been ended
    #[serde(rename = "transport.failed")]
    TransportFailed {
        session_id: String,
        transport: String,
        reason: String,
    },

    // ============================================================================
    // System Events
    // ============================================================================
    /// Generic system error
    #[serde(rename = "system.error")]
    SystemError {
        module: String,
        /// "warning", "error", "critical"
        severity: String,
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "live.session_created",
            Self::ViewerJoined { .. } => "live.viewer_joined",
            Self::ViewerLeft { .. } => "live.viewer_left",
            Self::SessionEnded { .. } => "live.session_ended",
            Self::TransportStarted { .. } => "transport.started",
            Self::TransportStopped { .. } => "transport.stopped",
            Self::TransportFailed { .. } => "transport.failed",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `live.*` matches all directory events
    /// - `live.session_ended` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_topic() {
        let event = SystemEvent::ViewerJoined {
            session_id: "s1".to_string(),
            viewers_count: 1,
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("live.*"));
        assert!(event.matches_topic("live.viewer_joined"));
        assert!(!event.matches_topic("transport.*"));
        assert!(!event.matches_topic("live.viewer_left"));
    }

    #[test]
    fn test_serialization() {
        let event = SystemEvent::SessionEnded {
            session_id: "s1".to_string(),
            ended_by: Some("h1".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("live.session_ended"));
        assert!(json.contains("\"ended_by\":\"h1\""));

        let deserialized: SystemEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(deserialized, SystemEvent::SessionEnded { .. }));
    }
}
