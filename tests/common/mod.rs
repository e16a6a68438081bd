//! Shared utilities for integration tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use rpc_shell::{ConnectionContext, ConnectionEvents, RpcService};

/// Service that echoes every request payload back.
#[allow(dead_code)]
pub struct EchoService;

impl RpcService for EchoService {
    async fn handle(&self, _ctx: &ConnectionContext, request: Bytes) -> io::Result<Bytes> {
        Ok(request)
    }
}

/// Subscriber that records lifecycle callbacks and lets tests flip the
/// idle hint.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingEvents {
    pub starts: AtomicUsize,
    pub ends: AtomicUsize,
    pub idle: AtomicBool,
    pub started_ids: Mutex<Vec<String>>,
    pub ended_ids: Mutex<Vec<String>>,
}

impl ConnectionEvents for RecordingEvents {
    fn connection_start(&self, ctx: &ConnectionContext) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.started_ids
            .lock()
            .unwrap()
            .push(ctx.connection_id().to_string());
    }

    fn connection_end(&self, ctx: &ConnectionContext) {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.ended_ids
            .lock()
            .unwrap()
            .push(ctx.connection_id().to_string());
    }

    fn is_idle_connection(&self, _ctx: &ConnectionContext) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
pub async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

/// Issue one framed-binary call and return the response payload.
#[allow(dead_code)]
pub async fn call<S>(stream: &mut S, payload: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_u32(payload.len() as u32).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();

    let len = stream.read_u32().await.unwrap() as usize;
    let mut response = vec![0u8; len];
    stream.read_exact(&mut response).await.unwrap();
    response
}

/// Poll `condition` until it holds, for at most two seconds.
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within two seconds");
}
