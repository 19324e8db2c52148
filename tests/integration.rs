//! Integration tests for evalpipe.
//!
//! These tests run a real server on a real endpoint and talk to it through
//! the public client.

use bytes::Bytes;
use evalpipe::client::{query, ClientError, ClientOptions, PipeClient};
use evalpipe::evaluator::ArithmeticEvaluator;
use evalpipe::protocol::{FrameCodec, FrameError};
use evalpipe::server::{Server, ServerConfig, ServerHandle};
use evalpipe::transport::{Duplex, EndpointState, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn channel_name(tag: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "evalpipe-it-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn start_server(tag: &str) -> ServerHandle {
    let config = ServerConfig {
        instruction_timeout: Duration::from_secs(5),
        accept_backoff: Duration::from_millis(10),
        reopen_backoff: Duration::from_millis(10),
        ..ServerConfig::new(channel_name(tag))
    };
    Server::new(config, ArithmeticEvaluator::new()).spawn()
}

fn patient() -> ClientOptions {
    ClientOptions {
        connect_attempts: 50,
        ..ClientOptions::default()
    }
}

async fn connect(handle: &ServerHandle) -> PipeClient {
    let mut client = PipeClient::connect(handle.channel_name(), patient())
        .await
        .unwrap();
    client.handshake().await.unwrap();
    client
}

/// Polls `counter` until it reaches `expected` or two seconds pass.
async fn wait_for(counter: &AtomicU64, expected: u64) -> bool {
    for _ in 0..100 {
        if counter.load(Ordering::Relaxed) >= expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_handshake_and_round_trips() {
    let handle = start_server("roundtrip");
    let mut client = connect(&handle).await;

    assert_eq!(client.request("x = 5; x * 2").await.unwrap(), "x = 510");
    assert_eq!(client.request("x * x - 1").await.unwrap(), "24");
    assert_eq!(client.request("(x + 1) % 4").await.unwrap(), "2");

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_truncates_response() {
    let handle = start_server("failure");
    let mut client = connect(&handle).await;

    assert_eq!(
        client.request("a = 1; 1 / 0; a = 2").await.unwrap(),
        "a = 1division by zero"
    );
    assert_eq!(client.request("a").await.unwrap(), "1");
    assert_eq!(
        client.request("missing + 1").await.unwrap(),
        "cannot find symbol: missing"
    );

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_response_is_still_framed() {
    let handle = start_server("empty");
    let mut client = connect(&handle).await;

    assert_eq!(client.request("").await.unwrap(), "");
    assert_eq!(client.request(" ; ").await.unwrap(), "");
    assert_eq!(client.request("1 + 1").await.unwrap(), "2");

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pipelined_instructions() {
    let handle = start_server("pipelined");
    let mut client = connect(&handle).await;

    client.send_raw(b"n = 2<END>n * 3<END>n * 4<END>").await.unwrap();
    assert_eq!(&client.read_frame().await.unwrap()[..], b"n = 2");
    assert_eq!(&client.read_frame().await.unwrap()[..], b"6");
    assert_eq!(&client.read_frame().await.unwrap()[..], b"8");

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_session_at_a_time() {
    let handle = start_server("single");
    let name = handle.channel_name().to_string();

    let mut first = connect(&handle).await;
    assert_eq!(first.request("shared = 7").await.unwrap(), "shared = 7");

    let second = tokio::spawn(async move {
        let mut client = PipeClient::connect(&name, patient()).await?;
        client.handshake().await?;
        client.request("shared * 6").await
    });

    // No acknowledgment while the first session is active
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!second.is_finished());
    assert_eq!(first.request("shared + 1").await.unwrap(), "8");

    drop(first);
    let response = tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response, "42");

    assert_eq!(
        handle.stats().sessions_accepted.load(Ordering::Relaxed),
        2
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recovery_after_mid_session_drop() {
    let handle = start_server("recovery");

    let mut first = connect(&handle).await;
    first.send_raw(b"lost = 1<END>partial instr").await.unwrap();
    drop(first);

    let mut second = connect(&handle).await;
    assert_eq!(second.request("lost").await.unwrap(), "1");
    assert!(handle.stats().endpoint_recreations.load(Ordering::Relaxed) >= 1);

    drop(second);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handshake_failure_drops_caller() {
    let handle = start_server("badshake");

    let mut intruder = PipeClient::connect(handle.channel_name(), patient())
        .await
        .unwrap();
    intruder
        .send_raw(b"HELLO<END>HI<END>HEY<END>READY<END>")
        .await
        .unwrap();
    assert!(matches!(
        intruder.read_frame().await,
        Err(ClientError::Disconnected) | Err(ClientError::Io(_))
    ));
    assert!(wait_for(&handle.stats().handshakes_failed, 1).await);

    // The endpoint is back for well-behaved callers
    let mut client = connect(&handle).await;
    assert_eq!(client.request("2 * 21").await.unwrap(), "42");

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handshake_accepted_after_bad_frames() {
    let handle = start_server("retryshake");

    let mut client = PipeClient::connect(handle.channel_name(), patient())
        .await
        .unwrap();
    client.send_raw(b"HELLO<END>HI<END>READY<END>").await.unwrap();
    assert_eq!(&client.read_frame().await.unwrap()[..], b"GO_AHEAD");
    assert_eq!(client.request("3 - 5").await.unwrap(), "-2");

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unframed_ready() {
    let handle = start_server("legacy");

    let mut client = PipeClient::connect(handle.channel_name(), patient())
        .await
        .unwrap();
    client.send_raw(b"READY").await.unwrap();
    assert_eq!(&client.read_frame().await.unwrap()[..], b"GO_AHEAD");

    drop(client);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_one_shot_query() {
    let handle = start_server("query");

    let response = query(handle.channel_name(), "q = 3; q * q").await.unwrap();
    assert_eq!(response, "q = 39");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_decode_timed_leaves_transport_usable() {
    let transport = Arc::new(Transport::new(channel_name("timed"), 4096));
    transport.open().await.unwrap();

    let server = Arc::clone(&transport);
    let accept = tokio::spawn(async move { server.accept().await });
    let mut client = PipeClient::connect(transport.name(), patient())
        .await
        .unwrap();
    accept.await.unwrap().unwrap();

    client.send_raw(b"no sentinel yet").await.unwrap();

    let mut codec = FrameCodec::new();
    let started = tokio::time::Instant::now();
    let result = codec
        .decode_timed(&*transport, Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(FrameError::TimedOut)));
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(transport.state().await, EndpointState::Connected);

    client.send_raw(b"<END>").await.unwrap();
    let frame = codec
        .decode_timed(&*transport, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(frame, Bytes::from("no sentinel yet"));

    transport.write(b"ack<END>").await.unwrap();
    assert_eq!(&client.read_frame().await.unwrap()[..], b"ack");

    transport.close().await;
}
