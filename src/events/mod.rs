//! Event system for real-time state notifications
//!
//! A process-wide event bus for broadcasting directory and transport events
//! to WebSocket clients and other subscribers.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting system events
///
/// Backed by a tokio broadcast channel; every active subscriber receives
/// every event published after it subscribed.
///
/// # Example
///
/// ```no_run
/// use livecast::events::{EventBus, SystemEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::ViewerJoined {
///     session_id: "abc".to_string(),
///     viewers_count: 1,
/// });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("Received event: {:?}", event);
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls too far behind receives `Lagged` and misses
    /// the overwritten events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SystemEvent::SessionEnded {
            session_id: "s1".to_string(),
            ended_by: None,
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SystemEvent::SessionEnded { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SystemEvent::SessionEnded { .. }
        ));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(SystemEvent::SystemError {
            module: "test".to_string(),
            severity: "warning".to_string(),
            message: "nobody listening".to_string(),
        });
    }
}
