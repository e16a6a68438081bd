//! rpc-shell: a connection-management shell around an RPC transport
//! engine.
//!
//! Turns "accept connections, invoke handler" into a production server:
//!
//! - synchronized, timeout-bounded startup on a dedicated supervisor
//!   thread (`lifecycle`);
//! - a live registry of per-connection metadata usable by handler code
//!   (`connection`);
//! - pluggable TLS and TCP-keepalive configuration (`net`);
//! - bounded concurrency and accept-queue knobs enforced by the built-in
//!   transport engine (`engine`), which speaks either length-prefixed
//!   binary frames or HTTP/1.1-wrapped payloads.
//!
//! ```no_run
//! use bytes::Bytes;
//! use rpc_shell::{ConnectionContext, RpcService, ServerBuilder};
//!
//! struct Echo;
//!
//! impl RpcService for Echo {
//!     async fn handle(&self, _ctx: &ConnectionContext, request: Bytes) -> std::io::Result<Bytes> {
//!         Ok(request)
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ServerBuilder::new("echo", Echo, 0).build()?;
//!     server.start()?;
//!     server.join();
//!     Ok(())
//! }
//! ```

// Core subsystems
pub mod config;
pub mod connection;
pub mod net;
pub mod server;

// Seams for the embedding application
pub mod auth;
pub mod service;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;

pub(crate) mod engine;

pub use auth::{AuthProvider, Identity};
pub use config::{ServerConfig, TransportKind};
pub use connection::{ConnectionContext, ConnectionEvents, ConnectionId};
pub use error::ServerError;
pub use lifecycle::ServerState;
pub use net::TlsVersion;
pub use server::{Server, ServerBuilder};
pub use service::RpcService;
