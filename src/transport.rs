//! Bidirectional message-framed transport.
//!
//! `Transport` is the boundary `Session` drives and is driven by. The reference implementation is
//! a websocket (`WebSocketTransport`), directly descended from the receive/send task split in the
//! teacher's game network client: one task reads frames off the socket and calls back into the
//! handler, a second owns the write half and drains an mpsc queue of outbound frames, and a shared
//! `Notify` tells both to unwind on `stop()`.
//!
//! `onError`'s classification (spec.md §4.2) happens in [`run_connection`]: an HTTP 401 during the
//! opening handshake becomes [`TransportError::Unauthorized`], everything else becomes
//! [`TransportError::WebSocket`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future::FutureExt, select_biased, sink::SinkExt, stream::StreamExt};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Notify,
};
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderName, HeaderValue, StatusCode},
        protocol::frame::{coding::CloseCode, CloseFrame},
        protocol::WebSocketConfig,
        Error as TungsteniteError, Message as WsMessage,
    },
    Connector,
};
use url::Url;

/// Errors a [`Transport`] can hand to [`TransportHandler::on_error`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP 401 during the websocket opening handshake.
    #[error("unauthorized")]
    Unauthorized,
    /// Any other transport-level failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] TungsteniteError),
}

/// Callbacks a [`Transport`] invokes on socket events. `Session` implements this and passes
/// itself (wrapped in an `Arc`) to `initialize`, the typed-interface analogue of the source's
/// captured closures (see spec.md §9).
#[async_trait]
pub trait TransportHandler: Send + Sync {
    async fn on_open(&self);
    async fn on_message(&self, frame: Vec<u8>);
    async fn on_error(&self, error: TransportError);
    async fn on_close(&self);
}

/// Opens, runs, and closes a bidirectional message channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Configure but do not connect.
    fn initialize(
        &self,
        url: Url,
        headers: HashMap<String, String>,
        handler: Arc<dyn TransportHandler>,
    );
    /// Block (asynchronously) until the socket closes, invoking the configured callbacks.
    async fn run(&self, verify_ssl: bool);
    /// Write one frame. May fail with a transport error.
    async fn send(&self, encoded: Vec<u8>) -> Result<(), TransportError>;
    /// Idempotent; causes `run` to return.
    fn stop(&self);
}

const RECEIVE_BUFFER_LIMIT: usize = 16 << 20;
const SEND_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// The reference transport, a websocket over TCP (optionally TLS).
pub struct WebSocketTransport {
    // populated by `initialize`, consumed by the one `run` call that follows it
    pending: parking_lot::Mutex<Option<PendingConnect>>,
    // populated once `run` starts the connection; used by `send`/`stop`
    live: parking_lot::Mutex<Option<Live>>,
}

struct PendingConnect {
    url: Url,
    headers: HashMap<String, String>,
    handler: Arc<dyn TransportHandler>,
}

struct Live {
    send_send: UnboundedSender<WsMessage>,
    shutdown: Arc<Notify>,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        WebSocketTransport {
            pending: parking_lot::Mutex::new(None),
            live: parking_lot::Mutex::new(None),
        }
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn initialize(&self, url: Url, headers: HashMap<String, String>, handler: Arc<dyn TransportHandler>) {
        *self.pending.lock() = Some(PendingConnect { url, headers, handler });
    }

    async fn run(&self, verify_ssl: bool) {
        let Some(PendingConnect { url, headers, handler }) = self.pending.lock().take() else {
            tracing::error!("Transport::run called before initialize");
            return;
        };

        let shutdown = Arc::new(Notify::new());
        let (send_send, recv_send) = unbounded_channel();
        *self.live.lock() = Some(Live {
            send_send,
            shutdown: Arc::clone(&shutdown),
        });

        run_connection(url, headers, handler, recv_send, shutdown, verify_ssl).await;
        *self.live.lock() = None;
    }

    async fn send(&self, encoded: Vec<u8>) -> Result<(), TransportError> {
        let guard = self.live.lock();
        let live = guard
            .as_ref()
            .ok_or(TransportError::WebSocket(TungsteniteError::AlreadyClosed))?;
        let text = String::from_utf8_lossy(&encoded).into_owned();
        live.send_send
            .send(WsMessage::Text(text))
            .map_err(|_| TransportError::WebSocket(TungsteniteError::AlreadyClosed))
    }

    fn stop(&self) {
        if let Some(live) = self.live.lock().as_ref() {
            live.shutdown.notify_waiters();
        }
        // an attempt to stop before `run` ever started just cancels the pending connect
        self.pending.lock().take();
    }
}

fn build_connector(verify_ssl: bool) -> Connector {
    if verify_ssl {
        return Connector::Rustls(Arc::new(default_tls_config()));
    }
    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
        .with_no_client_auth();
    config.enable_sni = true;
    Connector::Rustls(Arc::new(config))
}

fn default_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

mod danger {
    use std::time::SystemTime;

    /// `verifySsl = false` disables certificate verification entirely, matching the reference
    /// `ssl.CERT_NONE` behavior. Only reachable when the caller explicitly opts out.
    pub(super) struct NoCertificateVerification;

    impl rustls::client::ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls::Certificate,
            _intermediates: &[rustls::Certificate],
            _server_name: &rustls::ServerName,
            _scts: &mut dyn Iterator<Item = &[u8]>,
            _ocsp_response: &[u8],
            _now: SystemTime,
        ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
            Ok(rustls::client::ServerCertVerified::assertion())
        }
    }
}

fn build_request(url: &Url, headers: &HashMap<String, String>) -> Result<Request, TungsteniteError> {
    let mut request = url.as_str().into_client_request()?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TungsteniteError::Url(url::ParseError::EmptyHost.into()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TungsteniteError::Url(url::ParseError::EmptyHost.into()))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

async fn run_connection(
    url: Url,
    headers: HashMap<String, String>,
    handler: Arc<dyn TransportHandler>,
    mut recv_send: UnboundedReceiver<WsMessage>,
    shutdown: Arc<Notify>,
    verify_ssl: bool,
) {
    let request = match build_request(&url, &headers) {
        Ok(request) => request,
        Err(e) => {
            handler.on_error(TransportError::WebSocket(e)).await;
            handler.on_close().await;
            return;
        }
    };

    tracing::info!(%url, "connecting");
    let connector = build_connector(verify_ssl);
    let config = WebSocketConfig {
        max_message_size: Some(RECEIVE_BUFFER_LIMIT),
        ..Default::default()
    };
    let connect = connect_async_tls_with_config(request, Some(config), false, Some(connector));
    let connected = select_biased! {
        _ = shutdown.notified().fuse() => {
            tracing::trace!("abandoning connect attempt, stop requested");
            return;
        }
        result = connect.fuse() => result,
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(TungsteniteError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            handler.on_error(TransportError::Unauthorized).await;
            handler.on_close().await;
            return;
        }
        Err(e) => {
            handler.on_error(TransportError::WebSocket(e)).await;
            handler.on_close().await;
            return;
        }
    };

    let (mut ws_send, mut ws_recv) = ws.split();
    handler.on_open().await;

    let recv_loop = async {
        loop {
            match ws_recv.next().await {
                Some(Ok(WsMessage::Text(text))) => handler.on_message(text.into_bytes()).await,
                Some(Ok(WsMessage::Binary(bytes))) => handler.on_message(bytes).await,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => return Err(e),
            }
        }
    };

    let send_loop = async {
        while let Some(msg) = recv_send.recv().await {
            ws_send.send(msg).await?;
        }
        Ok::<(), TungsteniteError>(())
    };

    let error = select_biased! {
        _ = shutdown.notified().fuse() => None,
        result = recv_loop.fuse() => result.err(),
        result = send_loop.fuse() => result.err(),
    };

    if let Some(e) = error {
        handler.on_error(TransportError::WebSocket(e)).await;
    }

    let close_frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = tokio::time::timeout(SEND_CLOSE_TIMEOUT, ws_send.send(WsMessage::Close(Some(close_frame)))).await;
    handler.on_close().await;
}
