//! In-process websocket test server, grounded on the same accept-loop-over-`TcpListener`,
//! one-task-per-connection shape as `minecraft/src/server/network/ws.rs` in the teacher crate.
//! Lets the scenarios in spec.md §8 run end-to-end against a real socket instead of a mock
//! `Transport`.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

const RECORD_SEPARATOR: char = '\u{1e}';

pub struct WsTestServer {
    pub addr: SocketAddr,
    connections: mpsc::Receiver<WebSocketStream<TcpStream>>,
}

impl WsTestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        let _ = tx.send(ws).await;
                    }
                });
            }
        });
        WsTestServer { addr, connections: rx }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Wait for the next client connection to complete its websocket opening handshake.
    pub async fn accept(&mut self) -> WebSocketStream<TcpStream> {
        self.connections.recv().await.expect("a client connected")
    }
}

/// Send one JSON value as a single record-separated frame.
pub async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: &Value) {
    let mut text = value.to_string();
    text.push(RECORD_SEPARATOR);
    ws.send(WsMessage::Text(text)).await.expect("send frame");
}

/// Send several JSON values batched into one transport frame, as in spec.md scenario 6.
pub async fn send_batch(ws: &mut WebSocketStream<TcpStream>, values: &[Value]) {
    let mut text = String::new();
    for value in values {
        text.push_str(&value.to_string());
        text.push(RECORD_SEPARATOR);
    }
    ws.send(WsMessage::Text(text)).await.expect("send batch frame");
}

/// Receive one transport frame and decode every record-separated fragment in it.
pub async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> Vec<Value> {
    match ws.next().await {
        Some(Ok(WsMessage::Text(text))) => text
            .split(RECORD_SEPARATOR)
            .filter(|fragment| !fragment.is_empty())
            .map(|fragment| serde_json::from_str(fragment).expect("valid json fragment"))
            .collect(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// A minimal raw-TCP HTTP server that replies with a fixed status/body to every request it
/// accepts, for exercising the negotiate preflight without pulling in an HTTP mocking crate the
/// teacher doesn't already depend on.
pub async fn start_http_status_server(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}
