//! Concurrency-cap and accept-queue-timeout integration tests.

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use rpc_shell::ServerBuilder;

mod common;
use common::{call, connect, wait_until, EchoService};

#[tokio::test]
async fn third_connection_is_rejected_within_the_queue_timeout() {
    let server = ServerBuilder::new("limits-echo", EchoService, 0)
        .max_concurrent_connections(2)
        .queue_timeout_ms(100)
        .build()
        .unwrap();
    server.start().unwrap();
    let port = server.port();

    // Two connections occupy both slots and stay idle.
    let mut a = connect(port).await;
    let mut b = connect(port).await;
    call(&mut a, b"hold-a").await;
    call(&mut b, b"hold-b").await;
    wait_until(|| server.active_connections() == 2).await;

    // The third is accepted at the TCP level, waits in the queue, and is
    // rejected once the queue timeout elapses.
    let started = Instant::now();
    let mut c = connect(port).await;
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(1), c.read(&mut buf))
        .await
        .expect("queued connection was not rejected in time")
        .unwrap();
    assert_eq!(read, 0, "expected the server to close the queued connection");
    assert!(
        started.elapsed() >= Duration::from_millis(80),
        "rejected before the queue timeout elapsed"
    );

    // The two held connections are unaffected.
    assert_eq!(call(&mut a, b"again-a").await, b"again-a");
    assert_eq!(call(&mut b, b"again-b").await, b"again-b");
    assert_eq!(server.active_connections(), 2);

    // Releasing a slot lets a new connection through.
    drop(a);
    wait_until(|| server.active_connections() == 1).await;
    let mut d = connect(port).await;
    assert_eq!(call(&mut d, b"after-release").await, b"after-release");

    server.stop_for_testing();
}

#[tokio::test]
async fn unlimited_server_takes_many_connections() {
    let server = ServerBuilder::new("limits-unbounded", EchoService, 0)
        .build()
        .unwrap();
    server.start().unwrap();
    let port = server.port();

    let mut streams = Vec::new();
    for i in 0..16 {
        let mut stream = connect(port).await;
        call(&mut stream, format!("c{}", i).as_bytes()).await;
        streams.push(stream);
    }
    wait_until(|| server.active_connections() == 16).await;

    drop(streams);
    wait_until(|| server.active_connections() == 0).await;
    server.stop_for_testing();
}
