//! WebSocket tunnelling through a running proxy.

use std::time::Duration;

use axum::http::{header, StatusCode};
use futures_util::{SinkExt, StreamExt};
use proxy_pass::config::{BalancerMode, ProxyConfig, TargetSpec};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

mod common;

fn config(target: String, mode: BalancerMode) -> ProxyConfig {
    let mut config = ProxyConfig {
        targets: vec![TargetSpec::from(target.as_str())],
        ..ProxyConfig::default()
    };
    config.balancer.mode = mode;
    config.health_check.interval_secs = 60;
    config
}

#[tokio::test]
async fn negotiates_upstream_subprotocol_and_relays_frames() {
    let backend = common::start_ws_echo_backend(&["v2"]).await;
    let proxy = common::spawn_proxy(config(backend.to_string(), BalancerMode::Direct)).await;

    let mut request = format!("ws://{}/ws", proxy.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert(header::SEC_WEBSOCKET_PROTOCOL, "v1, v2".parse().unwrap());

    let (mut socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.headers()[header::SEC_WEBSOCKET_PROTOCOL], "v2");

    socket.send(Message::text("hello")).await.unwrap();
    socket.send(Message::binary(vec![0u8, 159, 146, 150])).await.unwrap();
    socket.send(Message::text("bye")).await.unwrap();

    assert_eq!(socket.next().await.unwrap().unwrap(), Message::text("hello"));
    assert_eq!(socket.next().await.unwrap().unwrap(), Message::binary(vec![0u8, 159, 146, 150]));
    assert_eq!(socket.next().await.unwrap().unwrap(), Message::text("bye"));

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn upstream_without_subprotocol_still_tunnels() {
    let backend = common::start_ws_echo_backend(&[]).await;
    let proxy = common::spawn_proxy(config(backend.to_string(), BalancerMode::Direct)).await;

    let (head, mut socket) = common::raw_ws_connect(proxy.addr, "/ws", "v1, v2").await;
    let head = head.to_ascii_lowercase();
    assert!(head.starts_with("http/1.1 101"), "{head}");
    assert!(!head.contains("sec-websocket-protocol"), "{head}");

    socket.send(Message::text("hello")).await.unwrap();
    assert_eq!(socket.next().await.unwrap().unwrap(), Message::text("hello"));
    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn client_close_code_reaches_upstream() {
    let (backend, mut closes) = common::start_ws_close_backend().await;
    let proxy = common::spawn_proxy(config(backend.to_string(), BalancerMode::Direct)).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", proxy.addr))
        .await
        .unwrap();
    socket
        .close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: "bye".into(),
        }))
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), closes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, (4000, "bye".to_string()));
}

#[tokio::test]
async fn upstream_close_code_reaches_client() {
    let (backend, _closes) = common::start_ws_close_backend().await;
    let proxy = common::spawn_proxy(config(backend.to_string(), BalancerMode::Direct)).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", proxy.addr))
        .await
        .unwrap();
    socket.send(Message::text("close-me")).await.unwrap();

    match socket.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4001);
            assert_eq!(frame.reason.as_str(), "server done");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn upstream_refusing_the_upgrade_is_502() {
    let backend = common::start_mock_backend("not a websocket").await;
    let proxy = common::spawn_proxy(config(backend.to_string(), BalancerMode::Direct)).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/ws", proxy.addr)).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::BAD_GATEWAY),
        other => panic!("expected 502, got {:?}", other.map(|(_, response)| response.status())),
    }
}

#[tokio::test]
async fn no_healthy_target_rejects_before_upgrade() {
    let dead = common::dead_addr().await;
    let proxy = common::spawn_proxy(config(dead.to_string(), BalancerMode::Latency)).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/ws", proxy.addr)).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE),
        other => panic!("expected 503, got {:?}", other.map(|(_, response)| response.status())),
    }
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let dead = common::dead_addr().await;
    let proxy = common::spawn_proxy(config(dead.to_string(), BalancerMode::RoundRobin)).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/ws", proxy.addr)).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::BAD_GATEWAY),
        other => panic!("expected 502, got {:?}", other.map(|(_, response)| response.status())),
    }
}
