//! WebRTC configuration

use serde::{Deserialize, Serialize};
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;

use super::mdns::{default_mdns_host_name, mdns_mode, mdns_mode_label};
use crate::error::{AppError, Result};

/// Public NAT-traversal servers used when nothing else is configured
pub const PUBLIC_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Peer-mesh connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN servers (static credentials only)
    pub turn_servers: Vec<TurnServer>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: PUBLIC_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: vec![],
        }
    }
}

impl WebRtcConfig {
    /// Host candidates only; handy on a LAN and in tests
    pub fn host_only() -> Self {
        Self {
            stun_servers: vec![],
            turn_servers: vec![],
        }
    }

    /// ICE server list handed to every new connection
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers: Vec<RTCIceServer> = self
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        for turn in &self.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }

    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URLs, e.g. `turn:turn.example.com:3478?transport=udp`
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Build a webrtc-rs API object with default codecs and interceptors
pub fn build_api(label: &str) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    let mut setting_engine = SettingEngine::default();
    let mode = mdns_mode();
    setting_engine.set_ice_multicast_dns_mode(mode);
    if mode == MulticastDnsMode::QueryAndGather {
        setting_engine.set_multicast_dns_host_name(default_mdns_host_name(label));
    }
    debug!("WebRTC mDNS mode: {} ({})", mdns_mode_label(mode), label);

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_public_stun() {
        let config = WebRtcConfig::default();
        let servers = config.ice_servers();
        assert_eq!(servers.len(), PUBLIC_STUN_SERVERS.len());
        assert!(servers.iter().all(|s| s.urls[0].starts_with("stun:")));
    }

    #[test]
    fn test_turn_servers_carry_credentials() {
        let config = WebRtcConfig {
            stun_servers: vec![],
            turn_servers: vec![TurnServer {
                urls: vec!["turn:turn.example.com:3478".to_string()],
                username: "user".to_string(),
                credential: "pass".to_string(),
            }],
        };
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].username, "user");
        assert_eq!(servers[0].credential, "pass");
    }
}
