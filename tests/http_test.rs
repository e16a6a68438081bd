//! HTTP-wrapped transport integration tests.

use std::io;

use bytes::Bytes;

use rpc_shell::{ConnectionContext, RpcService, ServerBuilder, TransportKind};

mod common;
use common::wait_until;

/// Echoes the payload and queues a session header for the response.
struct HeaderService;

impl RpcService for HeaderService {
    async fn handle(&self, ctx: &ConnectionContext, request: Bytes) -> io::Result<Bytes> {
        ctx.add_return_header("x-rpc-session: abc123");
        Ok(request)
    }
}

#[tokio::test]
async fn http_round_trip_with_return_headers_and_origin() {
    let server = ServerBuilder::new("http-echo", HeaderService, 0)
        .transport(TransportKind::Http)
        .build()
        .unwrap();
    server.start().unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", server.port()))
        .header("x-forwarded-for", "10.9.8.7")
        .body("http payload")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    // Headers queued by handler code come back on the response.
    assert_eq!(
        response.headers().get("x-rpc-session").unwrap(),
        "abc123"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"http payload");

    // The pooled client connection is still registered; its context saw
    // the forwarded origin of the first request.
    wait_until(|| server.active_connections() == 1).await;
    let contexts = server.connection_contexts();
    assert_eq!(contexts[0].http_origin(), Some("10.9.8.7"));

    drop(client);
    wait_until(|| server.active_connections() == 0).await;
    server.stop_for_testing();
}

#[tokio::test]
async fn each_http_connection_gets_its_own_context() {
    let server = ServerBuilder::new("http-multi", HeaderService, 0)
        .transport(TransportKind::Http)
        .build()
        .unwrap();
    server.start().unwrap();
    let url = format!("http://127.0.0.1:{}/", server.port());

    // Two separate clients mean two separate TCP connections.
    let first = reqwest::Client::new();
    let second = reqwest::Client::new();
    first.post(&url).body("a").send().await.unwrap();
    second.post(&url).body("b").send().await.unwrap();

    wait_until(|| server.active_connections() == 2).await;
    let contexts = server.connection_contexts();
    assert_ne!(contexts[0].connection_id(), contexts[1].connection_id());

    drop(first);
    drop(second);
    wait_until(|| server.active_connections() == 0).await;
    server.stop_for_testing();
}
