//! Network layer: listening-socket construction, TCP keepalive options
//! and TLS settings validation/acceptor building.
//!
//! Everything here validates synchronously in the calling thread; the
//! supervisor thread only consumes already-validated settings.

pub mod socket;
pub mod tls;

pub use socket::{bind_listener, KeepaliveOptions};
pub use tls::{is_supported, string_to_protocol, TlsSettings, TlsVersion};
