//! Connection tracking: per-connection metadata and the registry that
//! owns it.
//!
//! Every connect, RPC dispatch and disconnect flows from the transport
//! engine through [`ConnectionRegistry`], which updates its state and
//! drives the optional [`ConnectionEvents`] subscriber.

pub mod context;
pub mod registry;

pub use context::{ConnectionContext, ConnectionId};
pub use registry::{ConnectionEvents, ConnectionRegistry};
