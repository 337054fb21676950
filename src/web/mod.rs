mod handlers;
mod routes;
mod signal_ws;
mod ws;

pub use routes::create_router;
pub use signal_ws::signal_ws_handler;
pub use ws::{live_ws_handler, ws_handler};
