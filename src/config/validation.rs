//! Semantic configuration validation.
//!
//! Serde handles the syntactic layer; this module checks what a parsed
//! config actually means. Validation is a pure function over the config
//! and returns all errors found, not just the first.

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;
use crate::net::tls::string_to_protocol;

/// One semantic problem found in a configuration.
#[derive(Debug)]
pub enum ValidationError {
    EmptyName,
    EmptyHost,
    UnknownTlsVersion(String),
    MissingTlsPath(&'static str),
    BadMetricsAddress(String),
    IncompleteKeepalive,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyName => write!(f, "server name must not be empty"),
            ValidationError::EmptyHost => write!(f, "host must not be empty"),
            ValidationError::UnknownTlsVersion(v) => {
                write!(f, "unknown TLS minimum version '{}'", v)
            }
            ValidationError::MissingTlsPath(which) => {
                write!(f, "tls.{} must be set when TLS is configured", which)
            }
            ValidationError::BadMetricsAddress(a) => {
                write!(f, "metrics address '{}' is not a socket address", a)
            }
            ValidationError::IncompleteKeepalive => write!(
                f,
                "keepalive probe_period_s > 0 requires retry_period_s and retry_count > 0"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration. Returns every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }
    if config.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    if let Some(tls) = &config.tls {
        if string_to_protocol(&tls.min_version).is_err() {
            errors.push(ValidationError::UnknownTlsVersion(tls.min_version.clone()));
        }
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::MissingTlsPath("cert_path"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::MissingTlsPath("key_path"));
        }
    }

    let ka = &config.keepalive;
    if ka.probe_period_s > 0 && (ka.retry_period_s == 0 || ka.retry_count == 0) {
        errors.push(ValidationError::IncompleteKeepalive);
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadMetricsAddress(obs.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
