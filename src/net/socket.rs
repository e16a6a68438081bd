//! Listening socket creation and per-socket TCP options.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::ServerError;

/// Bind the listening socket for `host:port`.
///
/// With port 0 the OS picks an ephemeral port; the resolved address is
/// returned alongside the listener so callers can read the actual port
/// back.
pub async fn bind_listener(host: &str, port: u16) -> Result<(TcpListener, SocketAddr), ServerError> {
    let listener = TcpListener::bind((host, port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(address = %local_addr, "listener bound");
    Ok((listener, local_addr))
}

/// TCP keepalive options applied to every accepted socket.
///
/// A no-op unless the probe period is positive. The retry count is a
/// Linux-specific knob and is only applied there.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepaliveOptions {
    probe_period_s: u32,
    retry_period_s: u32,
    retry_count: u32,
}

impl KeepaliveOptions {
    pub fn new(probe_period_s: u32, retry_period_s: u32, retry_count: u32) -> Self {
        Self {
            probe_period_s,
            retry_period_s,
            retry_count,
        }
    }

    /// Keepalive probing is enabled only when the probe period is set.
    pub fn enabled(&self) -> bool {
        self.probe_period_s > 0
    }

    /// Apply these options to an accepted socket.
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let mut keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(u64::from(self.probe_period_s)));
        if self.retry_period_s > 0 {
            keepalive =
                keepalive.with_interval(Duration::from_secs(u64::from(self.retry_period_s)));
        }
        #[cfg(target_os = "linux")]
        if self.retry_count > 0 {
            keepalive = keepalive.with_retries(self.retry_count);
        }

        socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_disabled_without_probe_period() {
        assert!(!KeepaliveOptions::new(0, 10, 3).enabled());
        assert!(KeepaliveOptions::new(60, 10, 3).enabled());
    }

    #[tokio::test]
    async fn bind_resolves_ephemeral_port() {
        let (listener, addr) = bind_listener("127.0.0.1", 0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn keepalive_applies_to_live_socket() {
        let (listener, addr) = bind_listener("127.0.0.1", 0).await.unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        KeepaliveOptions::new(60, 10, 3).apply(&accepted).unwrap();
        client.await.unwrap();
    }
}
