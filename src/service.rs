//! The handler seam between the transport engine and application code.

use std::future::Future;
use std::io;

use bytes::Bytes;

use crate::connection::ConnectionContext;

/// Handles RPC calls dispatched by the transport engine.
///
/// Payload encoding is the application's business: the engine hands the
/// raw request bytes in and writes the returned bytes back out, framed or
/// HTTP-wrapped depending on the configured transport.
///
/// The context of the connection serving the current call is passed
/// explicitly. The borrow is valid only for the extent of this one call;
/// implementations must not retain it.
pub trait RpcService: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: &ConnectionContext,
        request: Bytes,
    ) -> impl Future<Output = io::Result<Bytes>> + Send;
}
