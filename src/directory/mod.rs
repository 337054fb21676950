//! Session directory
//!
//! Creates, lists, joins and ends live-session records. Pure data access:
//! nothing in here knows about media or peer connections.
//!
//! ```text
//!  host ── create ──►  live_streams (status=live, viewers=0)
//!  viewer ── join ──►  viewers_count + 1   (single UPDATE ... RETURNING)
//!  viewer ── leave ─►  MAX(viewers_count - 1, 0)
//!  host ── end ─────►  status=ended (first terminal state wins)
//!                          │
//!                          └─► DirectoryChange ─► list_live / watch subscriptions
//! ```

pub mod store;
pub mod subscription;
pub mod types;

pub use store::{SessionDirectory, SYSTEM_ENDED_BY};
pub use subscription::{DirectorySubscription, LiveListSubscription, SessionWatch};
pub use types::{
    channel_name_for, ChangeKind, CreateSession, CreatedSession, DirectoryChange, JoinedSession,
    LiveSession, SessionStatus,
};
