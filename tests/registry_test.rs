//! Connection-registry and subscriber integration tests.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use rpc_shell::ServerBuilder;

mod common;
use common::{call, connect, wait_until, EchoService, RecordingEvents};

#[tokio::test]
async fn every_connect_is_paired_with_one_disconnect() {
    let events = Arc::new(RecordingEvents::default());
    let server = ServerBuilder::new("registry-echo", EchoService, 0)
        .connection_events(events.clone())
        .build()
        .unwrap();
    server.start().unwrap();
    let port = server.port();

    let mut a = connect(port).await;
    let mut b = connect(port).await;
    call(&mut a, b"one").await;
    call(&mut b, b"two").await;
    wait_until(|| server.active_connections() == 2).await;

    let contexts = server.connection_contexts();
    assert_eq!(contexts.len(), 2);
    assert_ne!(contexts[0].connection_id(), contexts[1].connection_id());
    assert_eq!(contexts[0].server_name(), "registry-echo");
    assert!(contexts[0].username().is_empty());
    let known_id = contexts[0].connection_id();
    assert!(server.connection_context(known_id).is_some());

    drop(a);
    drop(b);
    wait_until(|| events.ends.load(Ordering::SeqCst) == 2).await;

    assert_eq!(events.starts.load(Ordering::SeqCst), 2);
    assert_eq!(server.active_connections(), 0);
    assert!(server.connection_contexts().is_empty());
    // A lookup for a disconnected id finds nothing rather than stale
    // data.
    assert!(server.connection_context(known_id).is_none());

    let mut started = events.started_ids.lock().unwrap().clone();
    let mut ended = events.ended_ids.lock().unwrap().clone();
    started.sort();
    ended.sort();
    assert_eq!(started, ended);

    server.stop_for_testing();
}

#[tokio::test]
async fn snapshot_size_tracks_active_connections() {
    let server = ServerBuilder::new("registry-snapshot", EchoService, 0)
        .build()
        .unwrap();
    server.start().unwrap();
    let port = server.port();

    let mut streams = Vec::new();
    for i in 0..3 {
        let mut stream = connect(port).await;
        call(&mut stream, format!("req-{}", i).as_bytes()).await;
        streams.push(stream);
    }
    wait_until(|| server.active_connections() == 3).await;
    assert_eq!(server.connection_contexts().len(), server.active_connections());

    streams.pop();
    wait_until(|| server.active_connections() == 2).await;
    assert_eq!(server.connection_contexts().len(), 2);

    drop(streams);
    wait_until(|| server.active_connections() == 0).await;
    server.stop_for_testing();
}

#[tokio::test]
async fn idle_connections_are_closed_by_the_poll() {
    let events = Arc::new(RecordingEvents::default());
    let server = ServerBuilder::new("registry-idle", EchoService, 0)
        .connection_events(events.clone())
        .idle_poll_period_ms(50)
        .build()
        .unwrap();
    server.start().unwrap();

    let mut stream = connect(server.port()).await;
    assert_eq!(call(&mut stream, b"warm").await, b"warm");

    // Not idle yet: the connection must survive several poll periods.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.active_connections(), 1);

    events.idle.store(true, Ordering::SeqCst);

    // The next poll closes the connection: the client sees EOF.
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("idle connection was not closed")
        .unwrap();
    assert_eq!(read, 0);

    wait_until(|| server.active_connections() == 0).await;
    assert_eq!(events.ends.load(Ordering::SeqCst), 1);
    server.stop_for_testing();
}
