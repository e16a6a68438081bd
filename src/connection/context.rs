//! Per-connection metadata.

use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock};

use uuid::Uuid;

use crate::auth::Identity;

/// Unique identifier for a connection, generated at connect time.
///
/// Random 128-bit values; unique among all currently active connections
/// and never reassigned for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Information about one client connection.
///
/// Created when the transport engine signals a new connection and owned
/// by the [`ConnectionRegistry`](super::ConnectionRegistry) until the
/// connection ends. Handler code sees a borrowed view for the duration of
/// one RPC call; subscribers see a borrowed view for the duration of one
/// callback. Identity fields never change after creation; the HTTP origin
/// and the return headers use interior mutability because the transport
/// fills them in while the connection is live.
#[derive(Debug)]
pub struct ConnectionContext {
    connection_id: ConnectionId,
    username: String,
    effective_user: String,
    network_address: SocketAddr,
    server_name: String,
    /// Origin of the session as recorded from the X-Forwarded-For header
    /// of the first HTTP request, when the HTTP transport is in use.
    http_origin: OnceLock<String>,
    /// Headers generated by handler code, returned on the next HTTP
    /// response and then cleared.
    return_headers: Mutex<Vec<String>>,
}

impl ConnectionContext {
    pub(crate) fn new(identity: Identity, peer: SocketAddr, server_name: &str) -> Self {
        Self {
            connection_id: ConnectionId::generate(),
            username: identity.username,
            effective_user: identity.effective_user,
            network_address: peer,
            server_name: server_name.to_string(),
            http_origin: OnceLock::new(),
            return_headers: Mutex::new(Vec::new()),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The authenticated principal, or an empty string if the transport
    /// provided none.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The user the request is effectively executed as.
    pub fn effective_user(&self) -> &str {
        &self.effective_user
    }

    pub fn network_address(&self) -> SocketAddr {
        self.network_address
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn http_origin(&self) -> Option<&str> {
        self.http_origin.get().map(String::as_str)
    }

    /// Record the session origin. First writer wins.
    pub(crate) fn set_http_origin(&self, origin: String) {
        let _ = self.http_origin.set(origin);
    }

    /// Queue a header line ("Name: value") for the next response on this
    /// connection. Only meaningful on the HTTP transport.
    pub fn add_return_header(&self, header: impl Into<String>) {
        self.return_headers.lock().unwrap().push(header.into());
    }

    /// Drain the queued return headers.
    pub(crate) fn take_return_headers(&self) -> Vec<String> {
        std::mem::take(&mut *self.return_headers.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ConnectionContext {
        ConnectionContext::new(
            Identity::anonymous(),
            "127.0.0.1:4049".parse().unwrap(),
            "unit",
        )
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[test]
    fn http_origin_first_writer_wins() {
        let ctx = context();
        assert_eq!(ctx.http_origin(), None);
        ctx.set_http_origin("10.0.0.1".into());
        ctx.set_http_origin("10.0.0.2".into());
        assert_eq!(ctx.http_origin(), Some("10.0.0.1"));
    }

    #[test]
    fn return_headers_drain() {
        let ctx = context();
        ctx.add_return_header("x-session: abc");
        ctx.add_return_header("x-trace: 1");
        assert_eq!(ctx.take_return_headers().len(), 2);
        assert!(ctx.take_return_headers().is_empty());
    }
}
