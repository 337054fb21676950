//! livecast - live broadcast session engine
//!
//! A host goes live, viewers discover and join the broadcast, and media
//! flows either over a peer-to-peer WebRTC mesh or through a managed RTC
//! engine. The crate provides the session directory, both transports, the
//! session controller that ties them together and an HTTP/WebSocket server
//! exposing the directory and the signaling relay.

pub mod broadcast;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod state;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
