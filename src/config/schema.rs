use serde::{Deserialize, Serialize};

use crate::webrtc::config::WebRtcConfig;
use crate::webrtc::media::FacingMode;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Peer-mesh connectivity settings
    pub webrtc: WebRtcConfig,
    /// Local capture settings
    pub capture: CaptureConfig,
    /// Session directory maintenance
    pub directory: DirectoryConfig,
    /// Transport selection
    pub transport: TransportConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Capture configuration (portrait 720x1280 @ 30fps by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub facing: FacingMode,
    /// Whether the platform grants capture access
    pub permission_granted: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            fps: 30,
            facing: FacingMode::User,
            permission_granted: true,
        }
    }
}

/// Session directory maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// How often stale live sessions are swept (seconds, 0 disables)
    pub cleanup_interval_secs: u64,
    /// A live session without a heartbeat for this long is ended (seconds)
    pub stale_after_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 60,
            stale_after_secs: 6 * 3600,
        }
    }
}

/// Which transport drives a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One peer connection per viewer
    #[default]
    Mesh,
    /// Single managed RTC engine with switchable roles
    Managed,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Mesh => write!(f, "mesh"),
            TransportKind::Managed => write!(f, "managed"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mesh" | "p2p" | "webrtc" => Ok(TransportKind::Mesh),
            "managed" | "engine" => Ok(TransportKind::Managed),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
}
