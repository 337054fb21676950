//! Managed real-time engine path
//!
//! Instead of one connection per viewer, a single engine instance owns the
//! connection plumbing and is switched between broadcaster and audience
//! roles. [`ManagedEngineAdapter`] guards the one instance; any engine
//! implementation plugs in through [`RtcEngineFactory`].

pub mod adapter;
pub mod local;
pub mod token;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EngineCredentials;
use crate::error::Result;

pub use adapter::ManagedEngineAdapter;
pub use local::{LocalEngine, LocalEngineFactory};
pub use token::{ChannelToken, TokenClient};

/// Engine role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    Broadcaster,
    Audience,
}

impl std::fmt::Display for EngineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineRole::Broadcaster => write!(f, "broadcaster"),
            EngineRole::Audience => write!(f, "audience"),
        }
    }
}

/// Channel join parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinChannel {
    pub channel: String,
    pub token: Option<String>,
    pub uid: String,
}

/// Snapshot of an engine's switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub preview_running: bool,
    pub local_video_muted: bool,
    pub role: Option<EngineRole>,
    pub channel: Option<String>,
    pub released: bool,
}

/// Full capability set every engine implements
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn enable_audio(&self) -> Result<()>;
    async fn enable_video(&self) -> Result<()>;
    async fn start_preview(&self) -> Result<()>;
    async fn stop_preview(&self) -> Result<()>;
    async fn mute_local_video(&self, muted: bool) -> Result<()>;
    async fn set_client_role(&self, role: EngineRole) -> Result<()>;
    async fn join_channel(&self, join: JoinChannel) -> Result<()>;
    async fn leave_channel(&self) -> Result<()>;
    /// Free every native resource; the engine is unusable afterwards
    async fn release(&self) -> Result<()>;
    fn status(&self) -> EngineStatus;
}

/// Creates engine instances from application credentials
#[async_trait]
pub trait RtcEngineFactory: Send + Sync {
    async fn create(&self, credentials: &EngineCredentials) -> Result<Arc<dyn RtcEngine>>;
}
