//! Configuration management subsystem.
//!
//! A config is parsed from TOML (or assembled in code), validated
//! semantically, and then treated as immutable: every field is set
//! exactly once before `Server::start`, and only read afterwards.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::load_config;
pub use schema::{KeepaliveConfig, ObservabilityConfig, ServerConfig, TlsConfig, TransportKind};
