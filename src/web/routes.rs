use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::signal_ws::signal_ws_handler;
use super::ws::{live_ws_handler, ws_handler};
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let live_routes = Router::new()
        .route("/live", get(handlers::list_live).post(handlers::create_live))
        // Registered before /live/:id so the socket path is not taken as an id
        .route("/live/ws", any(live_ws_handler))
        .route("/live/:id", get(handlers::get_live))
        .route("/live/:id/join", post(handlers::join_live))
        .route("/live/:id/leave", post(handlers::leave_live))
        .route("/live/:id/end", post(handlers::end_live))
        .route("/live/:id/heartbeat", post(handlers::heartbeat_live));

    let realtime_routes = Router::new()
        .route("/ws", any(ws_handler))
        .route("/signal/ws", any(signal_ws_handler))
        .route("/webrtc/ice-servers", get(handlers::webrtc_ice_servers));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(live_routes)
        .merge(realtime_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
