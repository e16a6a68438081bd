//! The server shell and its builder.
//!
//! A [`ServerBuilder`] accumulates configuration and produces one fully
//! configured, unstarted [`Server`]. `start` runs the transport engine on
//! a dedicated supervisor thread and blocks until the engine is serving,
//! startup fails, or the startup timeout elapses.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::{self, AuthProvider};
use crate::config::{ServerConfig, TransportKind};
use crate::connection::{ConnectionContext, ConnectionEvents, ConnectionId, ConnectionRegistry};
use crate::engine::{
    EngineSettings, TransportEngine, EXTERNAL_MAX_MESSAGE_BYTES, INTERNAL_MAX_MESSAGE_BYTES,
};
use crate::error::ServerError;
use crate::lifecycle::{
    ServerState, Shutdown, StartupHandshake, Supervisor, STARTUP_TIMEOUT,
};
use crate::net::{KeepaliveOptions, TlsSettings, TlsVersion};
use crate::service::RpcService;

/// An RPC server: transport engine, connection registry and lifecycle
/// management around a user-supplied [`RpcService`].
pub struct Server<S> {
    name: String,
    host: String,
    requested_port: u16,
    transport: TransportKind,
    external_facing: bool,
    max_concurrent_connections: usize,
    queue_timeout_ms: u64,
    idle_poll_period_ms: u64,
    tls: Option<TlsSettings>,
    keepalive: KeepaliveOptions,
    service: Arc<S>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Shutdown,
    state: Arc<Mutex<ServerState>>,
    bound_port: Arc<AtomicU16>,
    supervisor: Supervisor,
}

impl<S: RpcService> Server<S> {
    /// Start the server.
    ///
    /// Spawns the supervisor thread, which binds the listening socket,
    /// builds the TLS acceptor if configured, constructs the transport
    /// engine and runs its serve loop. The call blocks until the engine
    /// signals readiness, startup fails, or 2.5 seconds pass. Once it
    /// returns success, clients may connect and issue RPCs.
    ///
    /// May not be called more than once. On timeout the supervisor thread
    /// and any partially started engine are left running; this is a
    /// documented risk, not cleaned up silently.
    pub fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServerState::Unstarted {
                return Err(ServerError::Precondition(format!(
                    "start() called on server '{}' in state {:?}",
                    self.name, *state
                )));
            }
            *state = ServerState::Starting;
        }

        let handshake = Arc::new(StartupHandshake::new());

        let thread_handshake = Arc::clone(&handshake);
        let thread_state = Arc::clone(&self.state);
        let thread_bound_port = Arc::clone(&self.bound_port);
        let host = self.host.clone();
        let requested_port = self.requested_port;
        let tls = self.tls.clone();
        let settings = self.engine_settings();
        let service = Arc::clone(&self.service);
        let registry = Arc::clone(&self.registry);
        let auth = Arc::clone(&self.auth);
        let shutdown_rx = self.shutdown.subscribe();

        let handle = std::thread::Builder::new()
            .name(format!("{}-supervisor", self.name))
            .spawn(move || {
                supervise(
                    host,
                    requested_port,
                    tls,
                    settings,
                    service,
                    registry,
                    auth,
                    shutdown_rx,
                    thread_handshake,
                    thread_state,
                    thread_bound_port,
                )
            })
            .map_err(|e| {
                *self.state.lock().unwrap() = ServerState::StartFailed;
                ServerError::StartupFailed(format!("failed to spawn supervisor: {}", e))
            })?;
        self.supervisor.attach(handle);

        match handshake.wait(STARTUP_TIMEOUT) {
            Ok(port) => {
                *self.state.lock().unwrap() = ServerState::Running;
                tracing::info!(
                    server = %self.name,
                    port = port,
                    ssl = self.ssl_enabled(),
                    "server started"
                );
                Ok(())
            }
            Err(err @ ServerError::StartupTimeout(_)) => {
                // The supervisor thread keeps running; a late ready signal
                // is ignored by the handshake but the engine may still
                // come up. Known risk, reported to the caller as-is.
                tracing::error!(server = %self.name, "server failed to start within timeout");
                Err(err)
            }
            Err(err) => {
                *self.state.lock().unwrap() = ServerState::StartFailed;
                self.supervisor.join();
                tracing::error!(server = %self.name, error = %err, "server failed to start");
                Err(err)
            }
        }
    }

    /// Block until the server stops and the supervisor thread exits.
    pub fn join(&self) {
        self.supervisor.join();
    }

    /// FOR TESTING ONLY: request the engine to stop and block until the
    /// supervisor thread exits.
    ///
    /// Best-effort. Requests racing the stop can be cut mid-call and
    /// teardown is not guaranteed race-free on all paths; this is a
    /// known, deliberate limitation of the shutdown design and not a
    /// hardened public API.
    pub fn stop_for_testing(&self) {
        self.shutdown.trigger();
        self.supervisor.join();
    }

    /// The port the server is exposed on. The configured port, or after a
    /// successful start with port 0, the actually bound port.
    pub fn port(&self) -> u16 {
        let bound = self.bound_port.load(Ordering::SeqCst);
        if bound != 0 {
            bound
        } else {
            self.requested_port
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the listening socket only accepts TLS connections.
    pub fn ssl_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    /// Point-in-time list of all active connection contexts, for
    /// diagnostics.
    pub fn connection_contexts(&self) -> Vec<Arc<ConnectionContext>> {
        self.registry.snapshot()
    }

    /// Look up one active connection by id.
    pub fn connection_context(&self, id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.registry.get(id)
    }

    /// Number of currently active connections.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            transport: self.transport,
            max_concurrent_connections: self.max_concurrent_connections,
            queue_timeout: Duration::from_millis(self.queue_timeout_ms),
            idle_poll_period: Duration::from_millis(self.idle_poll_period_ms),
            max_message_bytes: if self.external_facing {
                EXTERNAL_MAX_MESSAGE_BYTES
            } else {
                INTERNAL_MAX_MESSAGE_BYTES
            },
            keepalive: self.keepalive,
        }
    }
}

/// Body of the supervisor thread: bind, build, signal, serve.
///
/// Errors before the ready hook are relayed to the `start` caller over
/// the handshake; the thread then exits without touching server state
/// (the caller records the failure).
#[allow(clippy::too_many_arguments)]
fn supervise<S: RpcService>(
    host: String,
    requested_port: u16,
    tls: Option<TlsSettings>,
    settings: EngineSettings,
    service: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    auth: Arc<dyn AuthProvider>,
    shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    handshake: Arc<StartupHandshake>,
    state: Arc<Mutex<ServerState>>,
    bound_port: Arc<AtomicU16>,
) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            handshake.signal_error(ServerError::StartupFailed(format!(
                "failed to build runtime: {}",
                e
            )));
            return;
        }
    };

    runtime.block_on(async {
        let (listener, local_addr) = match crate::net::bind_listener(&host, requested_port).await {
            Ok(bound) => bound,
            Err(e) => {
                handshake.signal_error(e);
                return;
            }
        };
        let acceptor = match &tls {
            Some(settings) => match settings.build_acceptor() {
                Ok(acceptor) => Some(acceptor),
                Err(e) => {
                    handshake.signal_error(e);
                    return;
                }
            },
            None => None,
        };

        let engine = TransportEngine::new(
            listener,
            acceptor,
            service,
            registry,
            auth,
            settings,
            shutdown_rx,
        );

        let ready_handshake = Arc::clone(&handshake);
        let ready_port_store = Arc::clone(&bound_port);
        let port = local_addr.port();
        engine
            .serve(Box::new(move || {
                ready_port_store.store(port, Ordering::SeqCst);
                ready_handshake.signal_ready(port);
            }))
            .await;
    });

    {
        let mut st = state.lock().unwrap();
        if *st == ServerState::Running {
            *st = ServerState::Stopping;
        }
    }
    // Dropping the runtime aborts any in-flight connection tasks; see
    // stop_for_testing for the teardown caveat.
    drop(runtime);
    {
        let mut st = state.lock().unwrap();
        if *st == ServerState::Stopping {
            *st = ServerState::Stopped;
        }
    }
}

/// Helper to build new [`Server`] instances.
///
/// All setters are independent, order-insensitive and defaulted: no TLS,
/// no concurrency cap, framed-binary transport, external-facing, no
/// keepalive, anonymous auth, no subscriber, no metrics.
pub struct ServerBuilder<S> {
    name: String,
    service: Arc<S>,
    host: String,
    port: u16,
    transport: TransportKind,
    external_facing: bool,
    max_concurrent_connections: usize,
    queue_timeout_ms: u64,
    idle_poll_period_ms: u64,
    enable_ssl: bool,
    ssl_version: TlsVersion,
    certificate: PathBuf,
    private_key: PathBuf,
    pem_password_cmd: String,
    cipher_list: String,
    tls13_ciphersuites: String,
    disable_tls12: bool,
    keepalive_probe_period_s: u32,
    keepalive_retry_period_s: u32,
    keepalive_retry_count: u32,
    events: Option<Arc<dyn ConnectionEvents>>,
    auth: Option<Arc<dyn AuthProvider>>,
    metrics_prefix: Option<String>,
}

impl<S: RpcService> ServerBuilder<S> {
    pub fn new(name: &str, service: S, port: u16) -> Self {
        Self {
            name: name.to_string(),
            service: Arc::new(service),
            host: "127.0.0.1".to_string(),
            port,
            transport: TransportKind::Binary,
            external_facing: true,
            max_concurrent_connections: 0,
            queue_timeout_ms: 0,
            idle_poll_period_ms: 0,
            enable_ssl: false,
            ssl_version: TlsVersion::Tlsv1_2,
            certificate: PathBuf::new(),
            private_key: PathBuf::new(),
            pem_password_cmd: String::new(),
            cipher_list: String::new(),
            tls13_ciphersuites: String::new(),
            disable_tls12: false,
            keepalive_probe_period_s: 0,
            keepalive_retry_period_s: 0,
            keepalive_retry_count: 0,
            events: None,
            auth: None,
            metrics_prefix: None,
        }
    }

    /// Seed a builder from a parsed configuration file.
    pub fn from_config(config: &ServerConfig, service: S) -> Result<Self, ServerError> {
        let mut builder = Self::new(&config.name, service, config.port)
            .host(&config.host)
            .transport(config.transport)
            .is_external_facing(config.external_facing)
            .max_concurrent_connections(config.max_connections)
            .queue_timeout_ms(config.queue_timeout_ms)
            .idle_poll_period_ms(config.idle_poll_period_ms)
            .keepalive(
                config.keepalive.probe_period_s,
                config.keepalive.retry_period_s,
                config.keepalive.retry_count,
            );
        if let Some(tls) = &config.tls {
            builder = builder
                .ssl(&tls.cert_path, &tls.key_path)
                .ssl_version(crate::net::string_to_protocol(&tls.min_version)?)
                .pem_password_cmd(&tls.pem_password_cmd)
                .cipher_list(&tls.cipher_list)
                .tls_ciphersuites(&tls.tls13_ciphersuites)
                .disable_tls12(tls.disable_tls12);
        }
        if !config.observability.metrics_prefix.is_empty() {
            builder = builder.metrics_prefix(&config.observability.metrics_prefix);
        }
        Ok(builder)
    }

    /// Host name to bind with. Default is loopback.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Underlying transport for the server.
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Whether the server talks to untrusted external clients. External
    /// servers use a more restrictive max message size. Default true, to
    /// be safe by default.
    pub fn is_external_facing(mut self, external_facing: bool) -> Self {
        self.external_facing = external_facing;
        self
    }

    /// Maximum number of concurrent connections. Default 0: no enforced
    /// limit.
    pub fn max_concurrent_connections(mut self, max: usize) -> Self {
        self.max_concurrent_connections = max;
        self
    }

    /// Time an accepted connection may wait for a connection slot before
    /// it is rejected. Default 0: no timeout.
    pub fn queue_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.queue_timeout_ms = timeout_ms;
        self
    }

    /// Client-inactivity period after which the connection is checked for
    /// idleness. Default 0: no polling.
    pub fn idle_poll_period_ms(mut self, period_ms: u64) -> Self {
        self.idle_poll_period_ms = period_ms;
        self
    }

    /// Enable secure access over TLS with the given certificate and
    /// private key files (PEM).
    pub fn ssl(mut self, certificate: impl Into<PathBuf>, private_key: impl Into<PathBuf>) -> Self {
        self.enable_ssl = true;
        self.certificate = certificate.into();
        self.private_key = private_key.into();
        self
    }

    /// Minimum SSL/TLS version clients may connect with.
    pub fn ssl_version(mut self, version: TlsVersion) -> Self {
        self.ssl_version = version;
        self
    }

    /// Command run to compute the private key password. Default is empty:
    /// no password needed.
    pub fn pem_password_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.pem_password_cmd = cmd.into();
        self
    }

    /// Acceptable TLS 1.2 cipher suites. Default: all the backend offers.
    pub fn cipher_list(mut self, cipher_list: impl Into<String>) -> Self {
        self.cipher_list = cipher_list.into();
        self
    }

    /// Acceptable TLS 1.3 ciphersuites. Default: all the backend offers.
    pub fn tls_ciphersuites(mut self, ciphersuites: impl Into<String>) -> Self {
        self.tls13_ciphersuites = ciphersuites.into();
        self
    }

    /// Disable TLS 1.2. Only for testing TLS 1.3 ciphersuite selection.
    pub fn disable_tls12(mut self, disable: bool) -> Self {
        self.disable_tls12 = disable;
        self
    }

    /// TCP keepalive knobs for client connections. Keepalive is only
    /// enabled when `probe_period_s` > 0.
    pub fn keepalive(
        mut self,
        probe_period_s: u32,
        retry_period_s: u32,
        retry_count: u32,
    ) -> Self {
        self.keepalive_probe_period_s = probe_period_s;
        self.keepalive_retry_period_s = retry_period_s;
        self.keepalive_retry_count = retry_count;
        self
    }

    /// Subscriber receiving connection lifecycle events. At most one per
    /// server.
    pub fn connection_events(mut self, events: Arc<dyn ConnectionEvents>) -> Self {
        self.events = Some(events);
        self
    }

    /// Auth provider for this server. Default is the process-wide
    /// anonymous provider.
    pub fn auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Prefix under which this server registers its connection metrics.
    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = Some(prefix.into());
        self
    }

    /// Construct the server.
    ///
    /// TLS settings are validated here; on failure the error is returned
    /// and no server is produced. On success keepalive options are
    /// applied and a configured, unstarted server is returned.
    pub fn build(self) -> Result<Server<S>, ServerError> {
        let tls = if self.enable_ssl {
            Some(TlsSettings::configure(
                self.ssl_version,
                self.certificate,
                self.private_key,
                &self.pem_password_cmd,
                &self.cipher_list,
                &self.tls13_ciphersuites,
                self.disable_tls12,
            )?)
        } else {
            None
        };

        let keepalive = KeepaliveOptions::new(
            self.keepalive_probe_period_s,
            self.keepalive_retry_period_s,
            self.keepalive_retry_count,
        );
        let registry = Arc::new(ConnectionRegistry::new(
            &self.name,
            self.events,
            self.metrics_prefix.as_deref(),
        ));

        Ok(Server {
            name: self.name,
            host: self.host,
            requested_port: self.port,
            transport: self.transport,
            external_facing: self.external_facing,
            max_concurrent_connections: self.max_concurrent_connections,
            queue_timeout_ms: self.queue_timeout_ms,
            idle_poll_period_ms: self.idle_poll_period_ms,
            tls,
            keepalive,
            service: self.service,
            auth: self.auth.unwrap_or_else(auth::default_provider),
            registry,
            shutdown: Shutdown::new(),
            state: Arc::new(Mutex::new(ServerState::Unstarted)),
            bound_port: Arc::new(AtomicU16::new(0)),
            supervisor: Supervisor::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Echo;
    impl RpcService for Echo {
        async fn handle(
            &self,
            _ctx: &ConnectionContext,
            request: Bytes,
        ) -> std::io::Result<Bytes> {
            Ok(request)
        }
    }

    #[test]
    fn build_defaults_to_unstarted_plaintext() {
        let server = ServerBuilder::new("unit", Echo, 0).build().unwrap();
        assert_eq!(server.state(), ServerState::Unstarted);
        assert!(!server.ssl_enabled());
        assert_eq!(server.active_connections(), 0);
    }

    #[test]
    fn build_fails_on_missing_tls_material() {
        let result = ServerBuilder::new("unit", Echo, 0)
            .ssl("/no/such/cert.pem", "/no/such/key.pem")
            .build();
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn join_before_start_is_a_noop() {
        let server = ServerBuilder::new("unit", Echo, 0).build().unwrap();
        server.join();
        assert_eq!(server.state(), ServerState::Unstarted);
    }
}
