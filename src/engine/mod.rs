//! Built-in transport engine: the accept loop and the per-connection
//! drivers.
//!
//! The engine owns enforcement of the connection limits the shell
//! validates and threads through: the concurrency cap, the accept-queue
//! timeout and the idle poll. RPC calls are dispatched on the runtime's
//! worker pool, one task per connection. The supervisor talks to the
//! engine only through construction, the ready hook, `serve` and the
//! shutdown broadcast.

pub(crate) mod binary;
pub(crate) mod http;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthProvider;
use crate::config::TransportKind;
use crate::connection::ConnectionRegistry;
use crate::net::KeepaliveOptions;
use crate::service::RpcService;

/// Buffer size for the buffered stream wrapped around each connection.
/// A larger buffer means fewer syscalls on the underlying transport.
pub(crate) const DEFAULT_BUFFER_SIZE_BYTES: usize = 128 * 1024;

/// Max message size for servers talking to untrusted/external peers.
pub(crate) const EXTERNAL_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Max message size for servers talking to trusted cluster-internal
/// peers, which construct their own messages.
pub(crate) const INTERNAL_MAX_MESSAGE_BYTES: usize = 1024 * 1024 * 1024;

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Validated knobs handed to the engine by the shell.
#[derive(Debug, Clone)]
pub(crate) struct EngineSettings {
    pub transport: TransportKind,
    /// 0 means no enforced limit.
    pub max_concurrent_connections: usize,
    /// Zero means accepted connections wait for a slot indefinitely.
    pub queue_timeout: Duration,
    /// Zero disables idle polling.
    pub idle_poll_period: Duration,
    pub max_message_bytes: usize,
    pub keepalive: KeepaliveOptions,
}

pub(crate) struct TransportEngine<S> {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    service: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    auth: Arc<dyn AuthProvider>,
    settings: EngineSettings,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S: RpcService> TransportEngine<S> {
    pub fn new(
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        service: Arc<S>,
        registry: Arc<ConnectionRegistry>,
        auth: Arc<dyn AuthProvider>,
        settings: EngineSettings,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            tls,
            service,
            registry,
            auth,
            settings,
            shutdown_rx,
        }
    }

    /// Run the accept loop until the shutdown broadcast fires.
    ///
    /// `on_ready` is invoked once, after all resources are acquired and
    /// immediately before the first accept.
    pub async fn serve(mut self, on_ready: Box<dyn FnOnce() + Send>) {
        let limiter = (self.settings.max_concurrent_connections > 0)
            .then(|| Arc::new(Semaphore::new(self.settings.max_concurrent_connections)));

        on_ready();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("stop requested; leaving accept loop");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let limiter = limiter.clone();
                    let tls = self.tls.clone();
                    let service = Arc::clone(&self.service);
                    let registry = Arc::clone(&self.registry);
                    let auth = Arc::clone(&self.auth);
                    let settings = self.settings.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, limiter, tls, service, registry, auth, settings)
                            .await;
                    });
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection<S: RpcService>(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    limiter: Option<Arc<Semaphore>>,
    tls: Option<TlsAcceptor>,
    service: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    auth: Arc<dyn AuthProvider>,
    settings: EngineSettings,
) {
    if let Err(e) = settings.keepalive.apply(&stream) {
        tracing::warn!(peer = %peer, error = %e, "failed to set keepalive options");
    }

    // Accepted connections wait in the queue for a slot; past the queue
    // timeout they are rejected without touching active connections.
    let _permit = match limiter {
        None => None,
        Some(semaphore) => {
            let acquired = if settings.queue_timeout.is_zero() {
                semaphore.acquire_owned().await.ok()
            } else {
                match timeout(settings.queue_timeout, semaphore.acquire_owned()).await {
                    Ok(Ok(permit)) => Some(permit),
                    _ => None,
                }
            };
            match acquired {
                Some(permit) => Some(permit),
                None => {
                    tracing::debug!(peer = %peer, "no connection slot within queue timeout; rejecting");
                    return;
                }
            }
        }
    };

    let identity = match auth.identify(peer) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "rejecting unauthenticated connection");
            return;
        }
    };

    match tls {
        Some(acceptor) => match timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => {
                run_connection(tls_stream, peer, identity, service, registry, settings).await;
            }
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer, error = %e, "tls handshake failed");
            }
            Err(_) => {
                tracing::debug!(peer = %peer, "tls handshake timed out");
            }
        },
        None => {
            run_connection(stream, peer, identity, service, registry, settings).await;
        }
    }
}

/// Register the connection, run its driver, and always deregister on the
/// way out.
async fn run_connection<IO, S>(
    io: IO,
    peer: std::net::SocketAddr,
    identity: crate::auth::Identity,
    service: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    settings: EngineSettings,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: RpcService,
{
    let ctx = registry.on_connect(peer, identity);

    let result = match settings.transport {
        TransportKind::Binary => {
            binary::drive(
                io,
                &ctx,
                service.as_ref(),
                &registry,
                settings.max_message_bytes,
                settings.idle_poll_period,
            )
            .await
        }
        TransportKind::Http => {
            http::drive(
                io,
                Arc::clone(&ctx),
                service,
                &registry,
                settings.max_message_bytes,
                settings.idle_poll_period,
            )
            .await
        }
    };

    if let Err(e) = result {
        tracing::debug!(connection_id = %ctx.connection_id(), error = %e, "connection ended with error");
    }
    registry.on_disconnect(ctx.connection_id());
}
