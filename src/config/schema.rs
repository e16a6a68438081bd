//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for an RPC
//! server shell. All types derive Serde traits for deserialization from
//! config files; every field has a default so minimal configs work.

use serde::{Deserialize, Serialize};

/// Root configuration for one RPC server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Human-readable server name. Shows up in logs, thread names and
    /// metric prefixes. Should not contain spaces.
    pub name: String,

    /// Host name or address to bind with.
    pub host: String,

    /// Port to listen on. 0 picks an ephemeral port; the actually bound
    /// port is readable from the server after start.
    pub port: u16,

    /// Underlying transport: framed binary or HTTP-wrapped.
    pub transport: TransportKind,

    /// Whether this server interacts with untrusted/external clients.
    /// External-facing servers use a more restrictive max message size.
    pub external_facing: bool,

    /// Maximum number of concurrent connections. 0 means no enforced
    /// limit.
    pub max_connections: usize,

    /// Time in milliseconds an accepted connection may wait for a
    /// connection slot before it is rejected. 0 means no timeout.
    pub queue_timeout_ms: u64,

    /// Period, in milliseconds, of client inactivity after which the
    /// connection is checked for idleness. 0 disables polling.
    pub idle_poll_period_ms: u64,

    /// Optional TLS settings. Absent means plaintext.
    pub tls: Option<TlsConfig>,

    /// TCP keepalive settings for accepted client sockets.
    pub keepalive: KeepaliveConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "rpc-server".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            transport: TransportKind::Binary,
            external_facing: true,
            max_connections: 0,
            queue_timeout_ms: 0,
            idle_poll_period_ms: 0,
            tls: None,
            keepalive: KeepaliveConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Transport implementation used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Length-prefixed RPC frames over the raw stream.
    Binary,
    /// RPC payloads wrapped in HTTP/1.1 request and response bodies.
    Http,
}

/// TLS settings for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Minimum accepted protocol version, e.g. "tlsv1.2". Matched
    /// case-insensitively.
    pub min_version: String,

    /// Path to the certificate chain file (PEM).
    pub cert_path: String,

    /// Path to the private key file (PEM).
    pub key_path: String,

    /// Command to run to obtain the private key password. Executed once
    /// at configuration time; the captured output is used only when the
    /// key file is password-protected.
    pub pem_password_cmd: String,

    /// TLS 1.2 cipher list clients may use, separated by ':' or ','.
    /// Empty means the backend's default set.
    pub cipher_list: String,

    /// TLS 1.3 ciphersuite list. Empty means the backend's default set.
    pub tls13_ciphersuites: String,

    /// Disable TLS 1.2 entirely. Only intended for testing TLS 1.3
    /// ciphersuite selection.
    pub disable_tls12: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: "tlsv1.2".to_string(),
            cert_path: String::new(),
            key_path: String::new(),
            pem_password_cmd: String::new(),
            cipher_list: String::new(),
            tls13_ciphersuites: String::new(),
            disable_tls12: false,
        }
    }
}

/// TCP keepalive settings, the three standard Linux knobs. Keepalive is
/// enabled only when `probe_period_s` > 0: an idle connection starts
/// probing after `probe_period_s` seconds, then retries every
/// `retry_period_s` seconds up to `retry_count` times.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub probe_period_s: u32,
    pub retry_period_s: u32,
    pub retry_count: u32,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics exporter.
    pub metrics_enabled: bool,

    /// Metrics exporter bind address.
    pub metrics_address: String,

    /// Prefix for the metrics this server registers. Empty disables
    /// per-server metrics registration.
    pub metrics_prefix: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            metrics_prefix: String::new(),
        }
    }
}
