//! Startup-handshake and server-state integration tests.

use rpc_shell::{ServerBuilder, ServerError, ServerState};

mod common;
use common::{call, connect, EchoService};

#[tokio::test]
async fn start_serves_on_ephemeral_port() {
    let server = ServerBuilder::new("lifecycle-echo", EchoService, 0)
        .build()
        .unwrap();
    server.start().unwrap();
    assert_eq!(server.state(), ServerState::Running);

    let port = server.port();
    assert_ne!(port, 0);

    let mut stream = connect(port).await;
    assert_eq!(call(&mut stream, b"ping").await, b"ping");
    drop(stream);

    server.stop_for_testing();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn second_start_is_a_precondition_violation() {
    let server = ServerBuilder::new("lifecycle-twice", EchoService, 0)
        .build()
        .unwrap();
    server.start().unwrap();

    let err = server.start().unwrap_err();
    assert!(matches!(err, ServerError::Precondition(_)));

    // The running server must not be corrupted by the second call.
    assert_eq!(server.state(), ServerState::Running);
    let mut stream = connect(server.port()).await;
    assert_eq!(call(&mut stream, b"still here").await, b"still here");
    drop(stream);

    server.stop_for_testing();
}

#[tokio::test]
async fn bind_failure_is_relayed_to_the_caller() {
    // Hold the port so the supervisor's bind fails.
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let server = ServerBuilder::new("lifecycle-clash", EchoService, port)
        .build()
        .unwrap();
    let err = server.start().unwrap_err();
    assert!(matches!(err, ServerError::Socket(_)));
    assert_eq!(server.state(), ServerState::StartFailed);

    // The supervisor thread exited after relaying the error.
    server.join();
}

#[test]
fn build_failure_produces_no_server() {
    let result = ServerBuilder::new("lifecycle-badssl", EchoService, 0)
        .ssl("/does/not/exist.pem", "/does/not/exist.key")
        .build();
    // No server exists, so nothing was spawned and there is nothing to
    // join.
    assert!(matches!(result, Err(ServerError::Config(_))));
}
