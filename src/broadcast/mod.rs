//! Broadcast session orchestration
//!
//! [`BroadcastSessionController`] ties a directory record to one
//! [`BroadcastTransport`]: either the peer mesh ([`MeshTransport`]) or the
//! managed engine ([`ManagedTransport`]).

pub mod controller;
pub mod transport;

pub use controller::{ActiveSession, BroadcastSessionController};
pub use transport::{BroadcastTransport, ManagedTransport, MeshTransport, TransportContext};
