//! The connection itself.
//!
//! `Session` is a thin handle around a reference-counted `Inner`, which doubles as the
//! [`TransportHandler`] the configured [`Transport`] calls back into. `start()` spawns one worker
//! task that owns the whole connect/handshake/run/reconnect cycle, a direct collapse of the
//! source's separate `_thread` (connect/reconnect loop) and the underlying transport's own
//! recv/send threads into a single `tokio` task, since `transport::run_connection` already merges
//! recv and send onto one task via `select_biased!`.
//!
//! `stop()` mirrors the source's thread-identity check before joining: a `threading.Thread` cannot
//! join itself, and this crate's analogue is a `tokio::task_local!` flag set for the lifetime of the
//! worker task. Calling `stop()` from that task skips the join and just requests the shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::checker::{Clock, ConnectionChecker};
use crate::codec::Codec;
use crate::config::{validate_target, Configuration};
use crate::error::{Result, SessionError};
use crate::handlers::EventHandlerRegistry;
use crate::logging::truncate_for_log;
use crate::message::{HandshakeRequest, HandshakeResponse, Message};
use crate::negotiate::{self, NegotiateError};
use crate::pending::{InvocationOutcome, PendingInvocations};
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportError, TransportHandler};

tokio::task_local! {
    static ON_WORKER_TASK: ();
}

fn on_worker_task() -> bool {
    ON_WORKER_TASK.try_with(|_| ()).is_ok()
}

type VoidCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// The source's `invoke` timeout is a hardcoded 5 seconds; exposed here as a named default so
/// callers of [`Session::invoke`] aren't left guessing what to pass, while still letting callers
/// choose a different timeout per call rather than baking in a single process-wide constant.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    config: Configuration,
    http_client: reqwest::Client,
    state: Mutex<ConnectionState>,
    handlers: EventHandlerRegistry,
    pending: PendingInvocations,
    clock: Arc<Clock>,
    checker_shutdown: Mutex<Option<Arc<Notify>>>,
    worker_done_rx: Mutex<Option<watch::Receiver<bool>>>,
    ever_connected: AtomicBool,
    close_reason: Mutex<Option<String>>,
    on_open_cb: Mutex<Option<VoidCallback>>,
    on_close_cb: Mutex<Option<ErrorCallback>>,
    on_reconnecting_cb: Mutex<Option<ErrorCallback>>,
    on_reconnected_cb: Mutex<Option<VoidCallback>>,
}

/// A single server-push RPC connection. Build one with [`crate::SessionBuilder`].
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub(crate) fn new(config: Configuration) -> Session {
        let http_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .expect("reqwest client config is static and always builds");
        Session {
            inner: Arc::new(Inner {
                config,
                http_client,
                state: Mutex::new(ConnectionState::Disconnected),
                handlers: EventHandlerRegistry::new(),
                pending: PendingInvocations::new(),
                clock: Clock::new(),
                checker_shutdown: Mutex::new(None),
                worker_done_rx: Mutex::new(None),
                ever_connected: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                on_open_cb: Mutex::new(None),
                on_close_cb: Mutex::new(None),
                on_reconnecting_cb: Mutex::new(None),
                on_reconnected_cb: Mutex::new(None),
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Spawn the worker task and return immediately. Returns `false` without doing anything if
    /// already running (matching the source's `start()`, which warns and returns `false` rather
    /// than starting a second worker on top of the first).
    pub fn start(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.is_running() {
                tracing::warn!("start() called while already running, ignoring");
                return false;
            }
            *state = ConnectionState::Connecting;
        }

        let (done_tx, done_rx) = watch::channel(false);
        *self.inner.worker_done_rx.lock() = Some(done_rx);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(ON_WORKER_TASK.scope((), async move {
            run_worker(inner, done_tx).await;
        }));
        true
    }

    /// Request a shutdown without waiting for the worker to exit. Safe to call from a synchronous
    /// handler registered via [`Session::on`], which cannot await the full [`Session::stop`].
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Stop the connection and wait for the worker task to exit, retrying the wait up to 5 times
    /// (3 seconds each) before giving up. A no-op if not running. Called from the worker task
    /// itself (a handler spawning back into it, say), this returns immediately after requesting
    /// the stop rather than waiting on itself.
    pub async fn stop(&self) -> Result<()> {
        self.inner.request_stop();

        if on_worker_task() {
            return Ok(());
        }

        let mut rx = match self.inner.worker_done_rx.lock().clone() {
            Some(rx) => rx,
            None => return Ok(()),
        };
        for _ in 0..5 {
            if *rx.borrow() {
                return Ok(());
            }
            let _ = tokio::time::timeout(Duration::from_secs(3), rx.changed()).await;
        }
        if *rx.borrow() {
            Ok(())
        } else {
            Err(SessionError::ConnectionClosing)
        }
    }

    /// Register a handler for server-initiated invocations of `target`. Multiple handlers for the
    /// same target all fire, in registration order.
    pub fn on(&self, target: &str, handler: impl Fn(Vec<Value>) + Send + Sync + 'static) -> Result<()> {
        validate_target(target)?;
        self.inner.handlers.on(target, Arc::new(handler));
        Ok(())
    }

    /// Remove every handler registered for `target`.
    pub fn off(&self, target: &str) -> Result<()> {
        validate_target(target)?;
        self.inner.handlers.off(target);
        Ok(())
    }

    /// Called once, the first time the handshake succeeds (not on a reconnect, see
    /// [`Session::on_reconnected`]).
    pub fn on_open(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_open_cb.lock() = Some(Arc::new(callback));
    }

    /// Called once the worker exits for good, with the closing error if there was one.
    pub fn on_close(&self, callback: impl Fn(Option<String>) + Send + Sync + 'static) {
        *self.inner.on_close_cb.lock() = Some(Arc::new(callback));
    }

    /// Called when a running connection drops and a reconnect attempt is about to begin.
    pub fn on_reconnecting(&self, callback: impl Fn(Option<String>) + Send + Sync + 'static) {
        *self.inner.on_reconnecting_cb.lock() = Some(Arc::new(callback));
    }

    /// Called when the handshake succeeds again after [`Session::on_reconnecting`] fired.
    pub fn on_reconnected(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_reconnected_cb.lock() = Some(Arc::new(callback));
    }

    /// Send a non-blocking invocation; does not wait for a `Completion`. `arguments` must be a
    /// JSON array.
    pub async fn send(&self, target: &str, arguments: Value) -> Result<()> {
        validate_target(target)?;
        let arguments = require_array(arguments)?;
        self.ensure_connected()?;
        let message = Message::invocation(None, target, arguments);
        self.write_message(&message).await
    }

    /// Send a blocking invocation and wait up to `timeout` for its `Completion` (pass
    /// [`DEFAULT_INVOKE_TIMEOUT`] to match the source's fixed 5-second wait). `arguments` must be a
    /// JSON array. An `error` completion (rather than a transport failure) resolves to `Ok` with the
    /// error string as the value, matching how the source's blocking `send` treats a completion
    /// error as a delivered result rather than an exception.
    pub async fn invoke(&self, target: &str, arguments: Value, timeout: Duration) -> Result<Value> {
        validate_target(target)?;
        let arguments = require_array(arguments)?;
        self.ensure_connected()?;

        let invocation_id = Uuid::new_v4().to_string();
        let rx = self.inner.pending.register(invocation_id.clone());
        let message = Message::invocation(Some(invocation_id.clone()), target, arguments);
        if let Err(e) = self.write_message(&message).await {
            self.inner.pending.remove(&invocation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(InvocationOutcome::Result(value))) => Ok(value),
            Ok(Ok(InvocationOutcome::Error(error))) => Ok(Value::String(error)),
            Ok(Err(_)) => Err(SessionError::NotConnected),
            Err(_) => {
                self.inner.pending.remove(&invocation_id);
                Err(SessionError::InvokeTimeout)
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if *self.inner.state.lock() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    async fn write_message(&self, message: &Message) -> Result<()> {
        let value = message.to_value();
        let encoded = self.inner.config.codec.encode(&value);
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(message = %truncate_for_log(&value.to_string()), "sending message");
        }
        self.inner.clock.touch_send();
        self.inner
            .config
            .transport
            .send(encoded)
            .await
            .map_err(|e| SessionError::SendTransport(e.into()))
    }
}

fn require_array(arguments: Value) -> Result<Vec<Value>> {
    match arguments {
        Value::Array(items) => Ok(items),
        _ => Err(SessionError::InvalidArguments),
    }
}

/// Best-effort extraction of a panic payload's message, for logging a panicking handler.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl Inner {
    /// Record why the connection is about to close, surfaced later through [`Session::on_close`].
    /// First reason wins: a handshake rejection racing a transport close shouldn't be overwritten
    /// by whatever generic error the socket teardown produces next.
    fn note_close_reason(&self, reason: impl Into<String>) {
        let mut slot = self.close_reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    fn request_stop(&self) {
        {
            let mut state = self.state.lock();
            if !state.is_running() {
                return;
            }
            *state = ConnectionState::Disconnecting;
        }
        self.config.transport.stop();
        if let Some(shutdown) = self.checker_shutdown.lock().take() {
            shutdown.notify_waiters();
        }
    }

    async fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = self.config.headers.clone();
        if let Some(factory) = &self.config.access_token_factory {
            headers.insert("Authorization".to_owned(), format!("Bearer {}", factory()));
        }
        headers
    }

    async fn send_ping(&self) {
        let encoded = self.config.codec.encode(&Message::ping().to_value());
        self.clock.touch_send();
        if let Err(e) = self.config.transport.send(encoded).await {
            tracing::warn!(error = %e, "failed to send keepalive ping");
        }
    }

    fn dispatch(&self, value: Value) {
        let Some(message) = Message::from_value(&value) else {
            tracing::trace!(?value, "unrecognized message, skipping");
            return;
        };
        match message {
            Message::Invocation { target, arguments, .. } => {
                for handler in self.handlers.handlers_for(&target) {
                    let args = arguments.clone();
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(args)));
                    if let Err(panic) = outcome {
                        let message = panic_message(&panic);
                        tracing::error!(target = %target, error = %message, "handler panicked, stopping");
                        self.note_close_reason(format!("handler for '{target}' panicked: {message}"));
                        self.request_stop();
                        break;
                    }
                }
            }
            Message::Completion { invocation_id, result, error } => {
                let outcome = match result {
                    Some(value) => InvocationOutcome::Result(value),
                    None => InvocationOutcome::Error(error.unwrap_or_default()),
                };
                self.pending.complete(&invocation_id, outcome);
            }
            Message::Ping => {
                // liveness already recorded by `on_message`'s `touch_received`
            }
            Message::Close { error } => {
                tracing::info!(?error, "server requested close");
                self.request_stop();
            }
            Message::StreamItem { .. } | Message::StreamInvocation { .. } | Message::CancelInvocation { .. } => {
                tracing::trace!("streaming message decoded but not acted on");
            }
        }
    }

    fn invoke_open_callback(&self) {
        if let Some(cb) = self.on_open_cb.lock().clone() {
            cb();
        }
    }

    fn invoke_close_callback(&self, error: Option<String>) {
        if let Some(cb) = self.on_close_cb.lock().clone() {
            cb(error);
        }
    }

    fn invoke_reconnecting_callback(&self, error: Option<String>) {
        if let Some(cb) = self.on_reconnecting_cb.lock().clone() {
            cb(error);
        }
    }

    fn invoke_reconnected_callback(&self) {
        if let Some(cb) = self.on_reconnected_cb.lock().clone() {
            cb();
        }
    }
}

#[async_trait]
impl TransportHandler for Inner {
    async fn on_open(&self) {
        tracing::debug!("transport open, sending handshake request");
        let handshake = HandshakeRequest {
            protocol: self.config.codec.name(),
            version: self.config.codec.version(),
        };
        let encoded = self.config.codec.encode(&handshake.to_value());
        self.clock.touch_send();
        if let Err(e) = self.config.transport.send(encoded).await {
            tracing::error!(error = %e, "failed to send handshake request");
        }
    }

    async fn on_message(&self, frame: Vec<u8>) {
        self.clock.touch_received();
        if tracing::enabled!(tracing::Level::DEBUG) {
            let raw = String::from_utf8_lossy(&frame);
            tracing::debug!(frame = %truncate_for_log(&raw), "received frame");
        }
        let values = match self.config.codec.decode(&frame) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode frame, dropping");
                return;
            }
        };
        let mut values = values.into_iter();

        if self.state.lock().is_handshaking() {
            let Some(first) = values.next() else {
                return;
            };
            let response = HandshakeResponse::from_value(&first);
            if !response.is_success() {
                tracing::error!(error = ?response.error, "handshake rejected");
                self.note_close_reason(format!(
                    "handshake rejected: {}",
                    response.error.as_deref().unwrap_or("unknown error")
                ));
                self.request_stop();
                return;
            }
            self.ever_connected.store(true, Ordering::SeqCst);
            let was_reconnecting = {
                let mut state = self.state.lock();
                let was = *state == ConnectionState::Reconnecting;
                *state = ConnectionState::Connected;
                was
            };
            self.pending.clear();
            if was_reconnecting {
                self.invoke_reconnected_callback();
            } else {
                self.invoke_open_callback();
            }
            // any further messages batched into the same frame as the handshake response are
            // dispatched below, now that the state has flipped to `Connected`.
        }

        for value in values {
            self.dispatch(value);
        }
    }

    async fn on_error(&self, error: TransportError) {
        match error {
            TransportError::Unauthorized => {
                tracing::error!("transport rejected as unauthorized, stopping");
                self.note_close_reason("unauthorized");
                self.request_stop();
            }
            TransportError::WebSocket(e) => {
                tracing::warn!(error = %e, "transport error");
            }
        }
    }

    async fn on_close(&self) {
        tracing::debug!("transport closed");
    }
}

async fn run_worker(inner: Arc<Inner>, done_tx: watch::Sender<bool>) {
    loop {
        if !inner.state.lock().is_running() {
            break;
        }

        let headers = inner.build_headers().await;
        let mut proceed_to_connect = true;

        if !inner.config.skip_negotiation {
            match negotiate::negotiate(&inner.http_client, &inner.config.url, &headers, inner.config.verify_ssl).await {
                Ok(()) => {}
                Err(NegotiateError::Unauthorized) => {
                    tracing::error!("negotiate rejected as unauthorized, stopping");
                    inner.note_close_reason("negotiate unauthorized");
                    *inner.state.lock() = ConnectionState::Disconnecting;
                    proceed_to_connect = false;
                }
                Err(NegotiateError::Transient(e)) => {
                    tracing::warn!(error = %e, "negotiate failed, deferring to reconnect decision");
                    proceed_to_connect = false;
                }
            }
        }

        if proceed_to_connect {
            inner.clock.touch_send();
            inner.clock.touch_received();

            let handler: Arc<dyn TransportHandler> = Arc::clone(&inner);
            inner
                .config
                .transport
                .initialize(inner.config.url.clone(), headers, handler);

            let checker_shutdown = Arc::new(Notify::new());
            *inner.checker_shutdown.lock() = Some(Arc::clone(&checker_shutdown));
            spawn_checker(Arc::clone(&inner), checker_shutdown);

            inner.config.transport.run(inner.config.verify_ssl).await;

            if let Some(shutdown) = inner.checker_shutdown.lock().take() {
                shutdown.notify_waiters();
            }
        }

        let mut state = inner.state.lock();
        if *state == ConnectionState::Disconnecting {
            *state = ConnectionState::Disconnected;
            break;
        }

        // `surrender` (default true) means: give up instead of retrying if the very first connect
        // attempt never got as far as a successful handshake. Once a connection has been
        // established at least once, a later drop always reconnects when configured to.
        let should_reconnect = inner.config.reconnect_interval.is_some()
            && (inner.ever_connected.load(Ordering::SeqCst) || !inner.config.surrender);

        if should_reconnect {
            *state = ConnectionState::Reconnecting;
            drop(state);
            inner.pending.clear();
            inner.invoke_reconnecting_callback(None);
            tokio::time::sleep(inner.config.reconnect_interval.unwrap()).await;
        } else {
            *state = ConnectionState::Disconnected;
            break;
        }
    }

    inner.pending.clear();
    let reason = inner.close_reason.lock().take();
    inner.invoke_close_callback(reason);
    let _ = done_tx.send(true);
}

fn spawn_checker(inner: Arc<Inner>, shutdown: Arc<Notify>) {
    let checker = ConnectionChecker::new(
        inner.config.keep_alive_interval,
        inner.config.server_timeout,
        Arc::clone(&inner.clock),
    );
    let ping_inner = Arc::clone(&inner);
    let stop_inner = Arc::clone(&inner);
    tokio::spawn(async move {
        checker
            .run(
                shutdown,
                move || {
                    let inner = Arc::clone(&ping_inner);
                    async move { inner.send_ping().await }
                },
                move || {
                    let inner = Arc::clone(&stop_inner);
                    async move { inner.request_stop() }
                },
            )
            .await;
    });
}
