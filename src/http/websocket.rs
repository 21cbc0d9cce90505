//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Read the subprotocols the client asks for, without accepting yet
//! - Connect to the target first, offering the same subprotocols
//! - Accept the client with exactly the subprotocol the target picked
//! - Relay frames in both directions until either side ends
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Target
//! ```
//!
//! # Design Decisions
//! - The upstream handshake runs over the pooled HTTP client and completes
//!   before the client handshake, so a failing target still gets a plain 502
//! - A target may pick none of the offered subprotocols; the client is then
//!   accepted without one
//! - Frame-level forwarding (no message buffering); ping, pong and close
//!   frames are relayed like data frames
//! - Each direction stops after relaying a close frame; both sockets are
//!   then closed and released, also when the relay task is cancelled
//! - The close reply of the other peer is not relayed: once one side has
//!   closed, each socket answers its own peer with the library's automatic
//!   close echo

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{self, WebSocket};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use futures_util::{stream, Sink, SinkExt, Stream, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::ProxyError;
use crate::health::Target;
use crate::http::forward::ForwardOptions;
use crate::http::headers::{self as hdr, X_FORWARDED_FOR};
use crate::http::HttpClient;
use crate::proxy::session::SessionGuard;

/// Time allowed for close frames to be flushed once a relay ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const WEBSOCKET_VERSION: HeaderValue = HeaderValue::from_static("13");

pub type UpstreamSocket = WebSocketStream<TokioIo<Upgraded>>;

/// Whether the request head asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let has_token = |name: header::HeaderName, token: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|v| v.trim().eq_ignore_ascii_case(token))
    };
    has_token(header::CONNECTION, "upgrade") && has_token(header::UPGRADE, "websocket")
}

/// Subprotocols offered by the client, in order.
pub fn requested_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Open the upstream WebSocket.
///
/// Returns the socket and the subprotocol the target accepted, if any.
pub async fn connect_upstream(
    client: &HttpClient,
    target: &Target,
    parts: &Parts,
    client_addr: Option<SocketAddr>,
    protocols: &[String],
    options: &ForwardOptions,
) -> Result<(UpstreamSocket, Option<String>), ProxyError> {
    let (path, query) = options.upstream_path(parts);
    let uri = target
        .uri_for(path, query)
        .map_err(|_| ProxyError::InvalidUpstreamUri {
            uri: format!("{}{path}", target.key()),
        })?;

    let key = generate_key();
    let mut request = Request::get(uri).body(Body::empty())?;
    let headers = request.headers_mut();
    *headers = handshake_headers(parts, client_addr, options);
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION);
    headers.insert(
        header::SEC_WEBSOCKET_KEY,
        HeaderValue::from_str(&key).map_err(axum::http::Error::from)?,
    );
    if !protocols.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&protocols.join(", ")) {
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
    }

    let handshake = async {
        let mut response = client
            .request(request)
            .await
            .map_err(|source| ProxyError::UpstreamConnect {
                target: target.key().to_string(),
                source,
            })?;
        let negotiated = accepted_protocol(response.status(), response.headers(), &key, protocols).map_err(
            |reason| ProxyError::WebSocketHandshake {
                target: target.key().to_string(),
                reason,
            },
        )?;
        let upgraded = hyper::upgrade::on(&mut response)
            .await
            .map_err(|source| ProxyError::Upgrade {
                target: target.key().to_string(),
                source,
            })?;
        Ok::<_, ProxyError>((upgraded, negotiated))
    };

    let (upgraded, negotiated) = match time::timeout(options.timeout, handshake).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProxyError::UpstreamTimeout {
                target: target.key().to_string(),
                timeout_ms: options.timeout.as_millis(),
            })
        }
    };
    let socket = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Client, None).await;

    tracing::debug!(
        target_host = %target,
        offered = ?protocols,
        negotiated = ?negotiated,
        "Upstream WebSocket connected"
    );
    Ok((socket, negotiated))
}

/// Check the upstream handshake response and read the subprotocol it picked.
fn accepted_protocol(
    status: StatusCode,
    headers: &HeaderMap,
    key: &str,
    offered: &[String],
) -> Result<Option<String>, String> {
    if status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(format!("expected 101 Switching Protocols, got {status}"));
    }

    let accept = headers.get(header::SEC_WEBSOCKET_ACCEPT).and_then(|v| v.to_str().ok());
    if accept != Some(derive_accept_key(key.as_bytes()).as_str()) {
        return Err("missing or wrong Sec-WebSocket-Accept".to_string());
    }

    match headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        None => Ok(None),
        Some(value) => {
            let protocol = value
                .to_str()
                .map_err(|_| "unreadable Sec-WebSocket-Protocol".to_string())?
                .trim();
            if offered.iter().any(|p| p == protocol) {
                Ok(Some(protocol.to_string()))
            } else {
                Err(format!("target picked unrequested subprotocol {protocol:?}"))
            }
        }
    }
}

/// Extra headers for the upstream handshake.
///
/// Only forwarding headers are sent; the handshake headers themselves are
/// generated for the new connection.
fn handshake_headers(parts: &Parts, client_addr: Option<SocketAddr>, options: &ForwardOptions) -> HeaderMap {
    let mut headers = match &options.override_headers {
        Some(headers) => headers.clone(),
        None => {
            let mut headers = HeaderMap::new();
            if let Some(chain) = parts.headers.get(&X_FORWARDED_FOR) {
                headers.insert(X_FORWARDED_FOR, chain.clone());
            }
            let host = parts.headers.get(header::HOST).and_then(|v| v.to_str().ok());
            let proto = parts.uri.scheme_str().unwrap_or("ws");
            hdr::add_forwarded(&mut headers, client_addr, proto, host);
            headers
        }
    };
    hdr::apply(&mut headers, &options.additional_headers);

    drop_reserved(&mut headers);
    headers
}

/// Remove headers that belong to the handshake of the new connection.
fn drop_reserved(headers: &mut HeaderMap) {
    let reserved: Vec<_> = headers
        .keys()
        .filter(|name| {
            hdr::is_hop_by_hop(name)
                || *name == header::HOST
                || *name == header::CONTENT_LENGTH
                || name.as_str().starts_with("sec-websocket-")
        })
        .cloned()
        .collect();
    for name in reserved {
        headers.remove(name);
    }
}

/// Relay between an accepted client socket and an upstream socket.
pub async fn relay_sockets<S>(client: WebSocket, upstream: WebSocketStream<S>, session: SessionGuard)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (client_tx, client_rx) = client.split();
    let (upstream_tx, upstream_rx) = upstream.split();

    let client_rx = client_rx.map(|item| item.map(to_upstream));
    let client_tx = client_tx.with_flat_map(|message| stream::iter(to_client(message).map(Ok)));

    relay(client_rx, client_tx, upstream_rx, upstream_tx, session).await;
}

/// Pump frames both ways until one direction ends, then close both sinks.
///
/// `session` is released when the relay returns or its future is dropped.
pub async fn relay<CR, CT, UR, UT, CE, UE>(
    mut client_rx: CR,
    mut client_tx: CT,
    mut upstream_rx: UR,
    mut upstream_tx: UT,
    session: SessionGuard,
) where
    CR: Stream<Item = Result<Message, CE>> + Unpin,
    UR: Stream<Item = Result<Message, UE>> + Unpin,
    CT: Sink<Message> + Unpin,
    UT: Sink<Message> + Unpin,
    CE: Display,
    UE: Display,
    <CT as Sink<Message>>::Error: Display,
    <UT as Sink<Message>>::Error: Display,
{
    tracing::debug!(session_id = %session.id(), "WebSocket relay started");

    let ended = tokio::select! {
        _ = pump(&mut client_rx, &mut upstream_tx, "client_to_upstream") => "client",
        _ = pump(&mut upstream_rx, &mut client_tx, "upstream_to_client") => "upstream",
    };

    let _ = time::timeout(CLOSE_GRACE, async {
        let _ = upstream_tx.close().await;
        let _ = client_tx.close().await;
    })
    .await;

    tracing::debug!(session_id = %session.id(), ended_by = ended, "WebSocket relay closed");
}

async fn pump<S, K, E>(source: &mut S, sink: &mut K, direction: &'static str)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    K: Sink<Message> + Unpin,
    E: Display,
    K::Error: Display,
{
    while let Some(item) = source.next().await {
        let message = match item {
            Ok(Message::Frame(_)) => continue,
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(direction, error = %e, "WebSocket read ended");
                return;
            }
        };

        let is_close = message.is_close();
        if let Err(e) = sink.send(message).await {
            tracing::debug!(direction, error = %e, "WebSocket write failed");
            return;
        }
        if is_close {
            return;
        }
    }
}

fn to_upstream(message: ws::Message) -> Message {
    match message {
        ws::Message::Text(text) => Message::Text(text.as_str().to_owned().into()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

fn to_client(message: Message) -> Option<ws::Message> {
    Some(match message {
        Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Ping(data) => ws::Message::Ping(data),
        Message::Pong(data) => ws::Message::Pong(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        Message::Frame(_) => return None,
    })
}
