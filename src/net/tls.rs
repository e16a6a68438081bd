//! TLS configuration and acceptor construction.
//!
//! Validation (file existence, protocol support, password command) runs
//! synchronously at configuration time, before any background thread
//! exists. The rustls acceptor itself is built later, when the listening
//! socket is created.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::SupportedCipherSuite;
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// SSL/TLS protocol versions a server can be configured with.
///
/// The full user-facing name set maps here; whether the linked backend can
/// actually speak a version is a separate question, answered by
/// [`is_supported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tlsv1_0,
    Tlsv1_1,
    Tlsv1_2,
    Tlsv1_3,
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TlsVersion::Tlsv1_0 => "TLSv1",
            TlsVersion::Tlsv1_1 => "TLSv1.1",
            TlsVersion::Tlsv1_2 => "TLSv1.2",
            TlsVersion::Tlsv1_3 => "TLSv1.3",
        };
        f.write_str(name)
    }
}

/// Map a user-facing protocol version name to a [`TlsVersion`].
///
/// Matching is case-insensitive and total over the known-name set; any
/// other input fails with [`ServerError::UnknownProtocol`].
pub fn string_to_protocol(name: &str) -> Result<TlsVersion, ServerError> {
    match name.to_ascii_lowercase().as_str() {
        "tlsv1" | "tlsv1.0" => Ok(TlsVersion::Tlsv1_0),
        "tlsv1.1" => Ok(TlsVersion::Tlsv1_1),
        "tlsv1.2" => Ok(TlsVersion::Tlsv1_2),
        "tlsv1.3" => Ok(TlsVersion::Tlsv1_3),
        _ => Err(ServerError::UnknownProtocol(name.to_string())),
    }
}

/// Whether the linked cryptography backend can speak `version`.
///
/// rustls supports TLS 1.2 and 1.3 only; older versions parse but cannot
/// be enabled.
pub fn is_supported(version: TlsVersion) -> bool {
    matches!(version, TlsVersion::Tlsv1_2 | TlsVersion::Tlsv1_3)
}

/// Validated TLS settings for one server.
///
/// Produced by [`TlsSettings::configure`]; holds everything the acceptor
/// build needs, including the cached key password if a password command
/// was configured.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    min_version: TlsVersion,
    cert_path: PathBuf,
    key_path: PathBuf,
    key_password: Option<String>,
    cipher_list: String,
    tls13_ciphersuites: String,
    disable_tls12: bool,
}

impl TlsSettings {
    /// Validate and assemble TLS settings.
    ///
    /// Fails with [`ServerError::Config`] if either file does not exist or
    /// the requested minimum version is unsupported by the linked backend.
    /// A non-empty `pem_password_cmd` is executed exactly once here; its
    /// captured output is cached and used only when the key file turns out
    /// to be password-protected.
    pub fn configure(
        min_version: TlsVersion,
        certificate: impl Into<PathBuf>,
        private_key: impl Into<PathBuf>,
        pem_password_cmd: &str,
        cipher_list: &str,
        tls13_ciphersuites: &str,
        disable_tls12: bool,
    ) -> Result<Self, ServerError> {
        let cert_path = certificate.into();
        let key_path = private_key.into();

        if !cert_path.exists() {
            return Err(ServerError::Config(format!(
                "certificate file does not exist: {}",
                cert_path.display()
            )));
        }
        if !key_path.exists() {
            return Err(ServerError::Config(format!(
                "private key file does not exist: {}",
                key_path.display()
            )));
        }
        if !is_supported(min_version) {
            return Err(ServerError::Config(format!(
                "TLS version {} is not supported by the linked cryptography backend",
                min_version
            )));
        }

        let key_password = if pem_password_cmd.is_empty() {
            None
        } else {
            Some(run_password_command(pem_password_cmd)?)
        };

        Ok(Self {
            min_version,
            cert_path,
            key_path,
            key_password,
            cipher_list: cipher_list.to_string(),
            tls13_ciphersuites: tls13_ciphersuites.to_string(),
            disable_tls12,
        })
    }

    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    /// Build the tokio-rustls acceptor from these settings.
    pub fn build_acceptor(&self) -> Result<TlsAcceptor, ServerError> {
        let certs = load_certs(&self.cert_path)?;
        let key = load_private_key(&self.key_path, self.key_password.as_deref())?;

        let mut provider = aws_lc_rs::default_provider();
        let tls12_enabled =
            self.min_version != TlsVersion::Tlsv1_3 && !self.disable_tls12;

        let tls12_allowed = parse_suite_list(&self.cipher_list);
        let tls13_allowed = parse_suite_list(&self.tls13_ciphersuites);
        provider.cipher_suites.retain(|suite| match suite {
            SupportedCipherSuite::Tls12(_) => {
                tls12_enabled && suite_permitted(suite, &tls12_allowed)
            }
            SupportedCipherSuite::Tls13(_) => suite_permitted(suite, &tls13_allowed),
        });

        if !provider
            .cipher_suites
            .iter()
            .any(|s| matches!(s, SupportedCipherSuite::Tls13(_)))
        {
            return Err(ServerError::Config(format!(
                "TLS 1.3 ciphersuite list '{}' matches no supported suite",
                self.tls13_ciphersuites
            )));
        }
        if tls12_enabled
            && !provider
                .cipher_suites
                .iter()
                .any(|s| matches!(s, SupportedCipherSuite::Tls12(_)))
        {
            return Err(ServerError::Config(format!(
                "cipher list '{}' matches no supported TLS 1.2 suite",
                self.cipher_list
            )));
        }

        let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = Vec::new();
        if tls12_enabled {
            versions.push(&rustls::version::TLS12);
        }
        versions.push(&rustls::version::TLS13);

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&versions)
            .map_err(|e| ServerError::Config(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Run the key-password command once and capture its trimmed stdout.
fn run_password_command(cmd: &str) -> Result<String, ServerError> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| ServerError::Config(format!("pem password command failed to run: {}", e)))?;
    if !output.status.success() {
        return Err(ServerError::Config(format!(
            "pem password command exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Load the certificate chain from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let data = fs::read(path).map_err(|e| {
        ServerError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| ServerError::Config(format!("bad certificate {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ServerError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load a private key from a PEM file.
///
/// Plain PKCS#8, PKCS#1 and SEC1 keys load directly. An encrypted PKCS#8
/// document is decrypted with the cached password from the configured
/// password command. Legacy DEK-Info encrypted PEM is not decryptable by
/// this backend and is rejected.
fn load_private_key(
    path: &Path,
    password: Option<&str>,
) -> Result<PrivateKeyDer<'static>, ServerError> {
    let data = fs::read(path).map_err(|e| {
        ServerError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    let text = String::from_utf8_lossy(&data);

    if text.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let password = password.ok_or_else(|| {
            ServerError::Config(format!(
                "{} is password-protected but no pem password command was configured",
                path.display()
            ))
        })?;
        return decrypt_pkcs8_key(&text, password, path);
    }
    if text.contains("DEK-Info") {
        return Err(ServerError::Config(format!(
            "{} uses legacy encrypted PEM, which the rustls backend cannot decrypt; \
             re-encrypt the key as PKCS#8",
            path.display()
        )));
    }

    let mut reader = data.as_slice();
    while let Some(item) = rustls_pemfile::read_one(&mut reader)
        .map_err(|e| ServerError::Config(format!("bad private key {}: {}", path.display(), e)))?
    {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(ServerError::Config(format!(
        "no private key found in {}",
        path.display()
    )))
}

/// Decrypt an encrypted PKCS#8 PEM document with the cached password.
fn decrypt_pkcs8_key(
    pem: &str,
    password: &str,
    path: &Path,
) -> Result<PrivateKeyDer<'static>, ServerError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let body: String = pem
        .lines()
        .skip_while(|l| !l.contains("BEGIN ENCRYPTED PRIVATE KEY"))
        .skip(1)
        .take_while(|l| !l.contains("END ENCRYPTED PRIVATE KEY"))
        .collect();
    let der = STANDARD
        .decode(body.trim())
        .map_err(|e| ServerError::Config(format!("bad encrypted key {}: {}", path.display(), e)))?;

    let info = pkcs8::EncryptedPrivateKeyInfo::try_from(der.as_slice()).map_err(|e| {
        ServerError::Config(format!("bad encrypted key {}: {}", path.display(), e))
    })?;
    let document = info.decrypt(password).map_err(|e| {
        ServerError::Config(format!("failed to decrypt {}: {}", path.display(), e))
    })?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        document.as_bytes().to_vec(),
    )))
}

/// Parse a ':'- or ','-separated suite list into normalized names.
fn parse_suite_list(list: &str) -> HashSet<String> {
    list.split([':', ','])
        .map(normalize_suite_name)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Normalize a ciphersuite name for comparison: uppercase, '-' to '_',
/// and the "TLS13_"/"TLS_" prefix dropped so that IANA names and rustls
/// names agree.
fn normalize_suite_name(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase().replace('-', "_");
    upper
        .strip_prefix("TLS13_")
        .or_else(|| upper.strip_prefix("TLS_"))
        .unwrap_or(&upper)
        .to_string()
}

/// Whether a suite passes a configured allow-list. An empty list means
/// the backend default set.
fn suite_permitted(suite: &SupportedCipherSuite, allowed: &HashSet<String>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    allowed.contains(&normalize_suite_name(&format!("{:?}", suite.suite())))
}
