//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::get;
use axum::{Json, Router};
use proxy_pass::config::ProxyConfig;
use proxy_pass::{HttpServer, Shutdown};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

/// Bind an ephemeral local port.
pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

/// Serve `router` on an ephemeral port.
pub async fn spawn_backend(router: Router) -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Raw TCP backend that answers every connection with a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Raw TCP backend whose status and body come from `f`, called per connection.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let (listener, addr) = bind().await;
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Backend that answers after `delay`, counting requests.
pub async fn start_slow_backend(delay: Duration, hits: Arc<AtomicU32>) -> SocketAddr {
    let router = Router::new().fallback(move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            "ok"
        }
    });
    spawn_backend(router).await
}

/// What the capture backend saw.
#[derive(Debug, Serialize, Deserialize)]
pub struct Captured {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body_len: usize,
}

/// Backend that reports the request it received as JSON.
pub async fn start_capture_backend() -> SocketAddr {
    async fn capture(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Captured> {
        let headers = headers
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        Json(Captured {
            method: method.to_string(),
            uri: uri.to_string(),
            headers,
            body_len: body.len(),
        })
    }

    spawn_backend(Router::new().fallback(capture)).await
}

/// Backend that streams `size` bytes in many small writes.
pub async fn start_streaming_backend(size: usize) -> SocketAddr {
    let router = Router::new().fallback(move || async move {
        let chunks = (0..size / 1024).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; 1024])));
        Body::from_stream(futures_util::stream::iter(chunks))
    });
    spawn_backend(router).await
}

/// Backend answering every request with `body` over keep-alive connections.
///
/// Returns the address and the number of connections accepted so far.
pub async fn start_counting_backend(body: &'static str) -> (SocketAddr, Arc<AtomicU32>) {
    let (listener, addr) = bind().await;
    let connections = Arc::new(AtomicU32::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let service = hyper::service::service_fn(move |_request| async move {
                    Ok::<_, std::convert::Infallible>(hyper::Response::new(body.to_string()))
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(hyper_util::rt::TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    (addr, connections)
}

/// WebSocket backend on `/ws` that accepts the first of `protocols` the
/// client offers (none when empty) and echoes every frame.
pub async fn start_ws_echo_backend(protocols: &'static [&'static str]) -> SocketAddr {
    async fn echo(mut socket: WebSocket) {
        while let Some(Ok(message)) = socket.recv().await {
            let done = matches!(message, Message::Close(_));
            if socket.send(message).await.is_err() || done {
                break;
            }
        }
    }

    let router = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| async move { ws.protocols(protocols.iter().copied()).on_upgrade(echo) }),
    );
    spawn_backend(router).await
}

/// WebSocket backend on `/ws` that reports the close frames it receives.
///
/// A text frame `close-me` makes it close with code 4001 and reason `server done`.
pub async fn start_ws_close_backend() -> (SocketAddr, mpsc::UnboundedReceiver<(u16, String)>) {
    async fn record(mut socket: WebSocket, closes: mpsc::UnboundedSender<(u16, String)>) {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) if text.as_str() == "close-me" => {
                    let frame = CloseFrame {
                        code: 4001,
                        reason: "server done".into(),
                    };
                    if socket.send(Message::Close(Some(frame))).await.is_err() {
                        break;
                    }
                }
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        let _ = closes.send((frame.code, frame.reason.as_str().to_string()));
                    }
                    break;
                }
                _ => {}
            }
        }
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let tx = tx.clone();
            async move { ws.on_upgrade(move |socket| record(socket, tx)) }
        }),
    );
    (spawn_backend(router).await, rx)
}

/// Open a WebSocket through a hand-written handshake offering `protocols`.
///
/// Unlike a strict client this accepts a 101 without a subprotocol. Returns
/// the raw response head and the socket.
pub async fn raw_ws_connect(addr: SocketAddr, path: &str, protocols: &str) -> (String, WebSocketStream<TcpStream>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Protocol: {protocols}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }

    let socket = WebSocketStream::from_raw_socket(stream, Role::Client, None).await;
    (String::from_utf8(head).unwrap(), socket)
}

/// A running proxy; stops when dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the proxy on an ephemeral port. Returns once the first health pass is done.
pub async fn spawn_proxy(mut config: ProxyConfig) -> TestProxy {
    let (listener, addr) = bind().await;
    config.listener.bind_address = addr.to_string();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let rx = shutdown.subscribe();
    let checker = server.proxy().balancer().health_checker().cloned();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    if let Some(checker) = checker {
        for _ in 0..100 {
            if checker.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    TestProxy { addr, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
