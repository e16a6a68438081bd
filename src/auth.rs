//! Identity extraction during connection setup.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// The identity attached to a connection at accept time.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// Authenticated principal. Empty if the transport provided none.
    pub username: String,
    /// The user requests on this connection are effectively executed as.
    pub effective_user: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Supplies the identity for a connecting peer.
///
/// An error rejects the connection before it is registered.
pub trait AuthProvider: Send + Sync {
    fn identify(&self, peer: SocketAddr) -> io::Result<Identity>;
}

/// The process-wide default provider: every peer is anonymous.
pub struct AnonymousAuth;

impl AuthProvider for AnonymousAuth {
    fn identify(&self, _peer: SocketAddr) -> io::Result<Identity> {
        Ok(Identity::anonymous())
    }
}

/// Default provider used when a server is built without an explicit one.
pub fn default_provider() -> Arc<dyn AuthProvider> {
    Arc::new(AnonymousAuth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_is_anonymous() {
        let identity = default_provider()
            .identify("10.1.2.3:50000".parse().unwrap())
            .unwrap();
        assert!(identity.username.is_empty());
        assert!(identity.effective_user.is_empty());
    }
}
