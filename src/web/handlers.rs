use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::TransportKind;
use crate::directory::{CreateSession, CreatedSession, JoinedSession, LiveSession};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::mdns::{mdns_mode, mdns_mode_label};

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub transport: TransportKind,
    pub live_sessions: i64,
    pub signaling_peers: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        transport: state.transport(),
        live_sessions: state.directory.live_count().await?,
        signaling_peers: state.signaling.peer_count(),
    }))
}

// ============================================================================
// Live sessions
// ============================================================================

/// Generic action response
#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
        })
    }
}

pub async fn create_live(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSession>,
) -> Result<Json<CreatedSession>> {
    let created = state.directory.create(req).await?;
    Ok(Json(created))
}

pub async fn list_live(State(state): State<Arc<AppState>>) -> Result<Json<Vec<LiveSession>>> {
    Ok(Json(state.directory.snapshot_live().await?))
}

pub async fn get_live(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LiveSession>> {
    Ok(Json(state.directory.get(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub viewer_id: String,
}

pub async fn join_live(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinedSession>> {
    if req.viewer_id.trim().is_empty() {
        return Err(AppError::BadRequest("viewerId must not be empty".to_string()));
    }
    Ok(Json(state.directory.join(&id, &req.viewer_id).await?))
}

pub async fn leave_live(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>> {
    state.directory.leave(&id).await?;
    Ok(ActionResponse::ok("Left session"))
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EndRequest {
    pub ended_by: Option<String>,
}

pub async fn end_live(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EndRequest>,
) -> Result<Json<ActionResponse>> {
    // Ending twice is fine, ending nothing is not
    state.directory.get(&id).await?;
    state.directory.end(&id, req.ended_by.as_deref()).await?;
    info!("Session {} ended via API", id);
    Ok(ActionResponse::ok("Session ended"))
}

pub async fn heartbeat_live(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>> {
    state.directory.heartbeat(&id).await?;
    Ok(Json(ActionResponse {
        success: true,
        message: None,
    }))
}

// ============================================================================
// WebRTC
// ============================================================================

/// ICE servers configuration for WebRTC
#[derive(Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServerInfo>,
    pub mdns_mode: String,
}

#[derive(Serialize)]
pub struct IceServerInfo {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// ICE servers clients should hand to their peer connections
pub async fn webrtc_ice_servers(State(state): State<Arc<AppState>>) -> Json<IceServersResponse> {
    let config = state.config.get();

    let mut ice_servers: Vec<IceServerInfo> = config
        .webrtc
        .stun_servers
        .iter()
        .map(|url| IceServerInfo {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        })
        .collect();

    ice_servers.extend(config.webrtc.turn_servers.iter().map(|turn| IceServerInfo {
        urls: turn.urls.clone(),
        username: Some(turn.username.clone()),
        credential: Some(turn.credential.clone()),
    }));

    Json(IceServersResponse {
        ice_servers,
        mdns_mode: mdns_mode_label(mdns_mode()).to_string(),
    })
}
