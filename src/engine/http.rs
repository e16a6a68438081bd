//! HTTP-wrapped connection driver.
//!
//! The RPC payload travels as the HTTP request body and the reply as the
//! response body. The connection is served with a hand-managed hyper
//! http/1.1 connection rather than a shared listener, so connection
//! lifetime, limits and lifecycle hooks stay with the engine.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{ConnectionContext, ConnectionRegistry};
use crate::service::RpcService;

/// Per-connection handler state: the call-scoped context plus the
/// service, shared with every request served on this connection.
struct CallState<S> {
    ctx: Arc<ConnectionContext>,
    service: Arc<S>,
    max_body_bytes: usize,
}

impl<S> Clone for CallState<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            service: Arc::clone(&self.service),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

pub(crate) async fn drive<IO, S>(
    io: IO,
    ctx: Arc<ConnectionContext>,
    service: Arc<S>,
    registry: &ConnectionRegistry,
    max_message_bytes: usize,
    idle_poll_period: Duration,
) -> io::Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: RpcService,
{
    let state = CallState {
        ctx: Arc::clone(&ctx),
        service,
        max_body_bytes: max_message_bytes,
    };
    let app: Router = Router::new()
        .fallback(rpc_endpoint::<S>)
        .with_state(state);

    let connection = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(io), TowerToHyperService::new(app));
    tokio::pin!(connection);

    if idle_poll_period.is_zero() {
        return connection.await.map_err(io::Error::other);
    }

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => return result.map_err(io::Error::other),
            _ = tokio::time::sleep(idle_poll_period) => {
                if !draining && registry.is_idle(&ctx) {
                    tracing::debug!(
                        connection_id = %ctx.connection_id(),
                        "draining idle connection"
                    );
                    connection.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        }
    }
}

async fn rpc_endpoint<S: RpcService>(
    State(state): State<CallState<S>>,
    request: Request,
) -> Response {
    let headers = request.headers();
    let origin = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("origin"))
        .and_then(|value| value.to_str().ok());
    if let Some(origin) = origin {
        state.ctx.set_http_origin(origin.to_string());
    }

    let body = match to_bytes(request.into_body(), state.max_body_bytes).await {
        Ok(body) => body,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    match state.service.handle(&state.ctx, body).await {
        Ok(reply) => {
            let mut response = reply.into_response();
            for header in state.ctx.take_return_headers() {
                let Some((name, value)) = header.split_once(':') else {
                    continue;
                };
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.trim()),
                    HeaderValue::try_from(value.trim()),
                ) {
                    response.headers_mut().append(name, value);
                }
            }
            response
        }
        Err(e) => {
            tracing::error!(
                connection_id = %state.ctx.connection_id(),
                error = %e,
                "rpc handler failed"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
