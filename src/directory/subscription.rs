//! Cancellable live-update subscriptions over the session directory

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::LiveSession;

/// Snapshot buffer per subscription
pub(crate) const SUBSCRIPTION_BUFFER: usize = 8;

/// A stream of snapshots fed by a background task
///
/// Cancelling (or dropping) the subscription stops the feeding task, and
/// `next()` returns `None` from then on, even for snapshots that were
/// already buffered.
pub struct DirectorySubscription<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

/// Continuously updated list of live sessions, newest first
pub type LiveListSubscription = DirectorySubscription<Vec<LiveSession>>;

/// Single-session listen; `None` means the record no longer exists
pub type SessionWatch = DirectorySubscription<Option<LiveSession>>;

impl<T> DirectorySubscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Wait for the next snapshot
    pub async fn next(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            value = self.rx.recv() => {
                if self.cancel.is_cancelled() {
                    None
                } else {
                    value
                }
            }
        }
    }

    /// Stop delivery
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by the feeding task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<T> Drop for DirectorySubscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_discards_buffered_values() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = DirectorySubscription::new(rx, CancellationToken::new());

        tx.send(1u32).await.unwrap();
        tx.send(2u32).await.unwrap();
        assert_eq!(sub.next().await, Some(1));

        sub.cancel();
        assert_eq!(sub.next().await, None);
        assert!(tx.send(3).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels_token() {
        let (_tx, rx) = mpsc::channel::<u32>(1);
        let token = CancellationToken::new();
        let sub = DirectorySubscription::new(rx, token.clone());
        drop(sub);
        assert!(token.is_cancelled());
    }
}
