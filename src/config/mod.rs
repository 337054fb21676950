//! Configuration: persisted application settings and environment credentials

pub mod env;
pub mod schema;
pub mod store;

pub use env::EngineCredentials;
pub use schema::*;
pub use store::ConfigStore;
