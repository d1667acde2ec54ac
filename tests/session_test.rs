//! End-to-end scenarios from spec.md §8, run against the in-process test server in
//! `tests/common`.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use common::{send_batch, send_json, start_http_status_server, WsTestServer};
use signalr_client::{SessionBuilder, SessionError, DEFAULT_INVOKE_TIMEOUT};

fn oneshot_flag() -> (Arc<AtomicBool>, impl Fn()) {
    let flag = Arc::new(AtomicBool::new(false));
    let setter_flag = Arc::clone(&flag);
    (flag, move || setter_flag.store(true, Ordering::SeqCst))
}

/// Scenario 1: a server that echoes a `Completion` to every `Invocation` resolves `invoke`.
#[tokio::test(flavor = "multi_thread")]
async fn happy_invoke_returns_the_completion_result() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .build();
    session.start();

    let mut ws = server.accept().await;
    let handshake = common::recv_json(&mut ws).await;
    assert_eq!(handshake[0]["protocol"], json!("json"));
    send_json(&mut ws, &json!({})).await;

    let server_task = tokio::spawn(async move {
        let messages = common::recv_json(&mut ws).await;
        let invocation_id = messages[0]["invocationId"].as_str().unwrap().to_owned();
        assert_eq!(messages[0]["target"], json!("add"));
        send_json(
            &mut ws,
            &json!({"type": 3, "invocationId": invocation_id, "result": 42}),
        )
        .await;
    });

    let result = session
        .invoke("add", json!([1, 2]), DEFAULT_INVOKE_TIMEOUT)
        .await
        .expect("invoke should succeed");
    assert_eq!(result, json!(42));
    server_task.await.unwrap();
}

/// Scenario 2: a server that never completes the invocation raises `InvokeTimeout`, and the
/// pending invocation is removed (a late, unrelated completion for the same id is dropped).
#[tokio::test(flavor = "multi_thread")]
async fn invoke_without_a_completion_times_out() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .build();
    session.start();

    let mut ws = server.accept().await;
    common::recv_json(&mut ws).await;
    send_json(&mut ws, &json!({})).await;
    // drain the invocation frame but never answer it
    common::recv_json(&mut ws).await;

    let result = session
        .invoke("slow", json!([]), Duration::from_millis(150))
        .await;
    assert!(matches!(result, Err(SessionError::InvokeTimeout)));
}

/// Scenario 3: a handshake rejection moves straight to `Disconnecting`/`onClose`, `onOpen` never
/// fires.
#[tokio::test(flavor = "multi_thread")]
async fn handshake_rejection_closes_without_ever_opening() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .build();

    let (opened, mark_opened) = oneshot_flag();
    session.on_open(move || mark_opened());
    let (close_tx, close_rx) = oneshot::channel();
    let close_tx = std::sync::Mutex::new(Some(close_tx));
    session.on_close(move |reason| {
        if let Some(tx) = close_tx.lock().unwrap().take() {
            let _ = tx.send(reason);
        }
    });

    session.start();
    let mut ws = server.accept().await;
    common::recv_json(&mut ws).await;
    send_json(&mut ws, &json!({"error": "bad protocol"})).await;

    let reason = tokio::time::timeout(Duration::from_secs(2), close_rx)
        .await
        .expect("onClose should fire")
        .unwrap();
    assert!(reason.unwrap().contains("bad protocol"));
    assert!(!opened.load(Ordering::SeqCst));
}

/// Scenario 4: with a keepalive/timeout watchdog configured, the checker triggers a stop once the
/// server goes silent longer than `serverTimeout`.
#[tokio::test(flavor = "multi_thread")]
async fn silent_server_triggers_checker_stop() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .keep_alive_interval(Duration::from_millis(200))
        .server_timeout(Duration::from_millis(500))
        .build();

    let (close_tx, close_rx) = oneshot::channel();
    let close_tx = std::sync::Mutex::new(Some(close_tx));
    session.on_close(move |_| {
        if let Some(tx) = close_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    });

    session.start();
    let mut ws = server.accept().await;
    common::recv_json(&mut ws).await;
    send_json(&mut ws, &json!({})).await;
    // keep the socket open but stop answering; the checker's own 5s sleep tick is what bounds
    // this wait, not the transport noticing a close
    let _silent_connection = ws;

    tokio::time::timeout(Duration::from_secs(8), close_rx)
        .await
        .expect("onClose should eventually fire once the server goes silent")
        .unwrap();
}

/// Scenario 5: with reconnect enabled and `surrender = false`, a socket close after a successful
/// handshake fires `onReconnecting` then `onReconnected` on the next connect.
#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_the_socket_closes() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .automatic_reconnect(Duration::from_millis(100), false)
        .build();

    let (reconnecting, mark_reconnecting) = oneshot_flag();
    session.on_reconnecting(move |_| mark_reconnecting());
    let (reconnected_tx, reconnected_rx) = oneshot::channel();
    let reconnected_tx = std::sync::Mutex::new(Some(reconnected_tx));
    session.on_reconnected(move || {
        if let Some(tx) = reconnected_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    });

    session.start();

    let mut first = server.accept().await;
    common::recv_json(&mut first).await;
    send_json(&mut first, &json!({})).await;
    drop(first); // server-initiated close

    let mut second = server.accept().await;
    common::recv_json(&mut second).await;
    send_json(&mut second, &json!({})).await;

    tokio::time::timeout(Duration::from_secs(3), reconnected_rx)
        .await
        .expect("onReconnected should fire")
        .unwrap();
    assert!(reconnecting.load(Ordering::SeqCst));
}

/// Scenario 6: a handshake response and a data message batched into one transport frame both get
/// processed: the handler fires exactly once, and the state has already flipped to `Connected`.
#[tokio::test(flavor = "multi_thread")]
async fn batched_handshake_and_invocation_both_dispatch() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .build();

    let call_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let (call_tx, call_rx) = oneshot::channel();
    let call_tx = std::sync::Mutex::new(Some(call_tx));
    let counter = Arc::clone(&call_count);
    session
        .on("t", move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(args, vec![json!(5)]);
            if let Some(tx) = call_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        })
        .unwrap();

    session.start();
    let mut ws = server.accept().await;
    common::recv_json(&mut ws).await;
    send_batch(
        &mut ws,
        &[json!({}), json!({"type": 1, "target": "t", "arguments": [5]})],
    )
    .await;

    tokio::time::timeout(Duration::from_secs(2), call_rx)
        .await
        .expect("the batched invocation should dispatch")
        .unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), signalr_client::ConnectionState::Connected);
}

/// Scenario 7: negotiate returning 401 stops the session before ever attempting the socket, and
/// `onClose` still fires exactly once.
#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_negotiate_stops_without_connecting() {
    let addr = start_http_status_server("HTTP/1.1 401 Unauthorized", "{}").await;
    let session = SessionBuilder::new(format!("ws://{addr}/hub")).unwrap().build();

    let (close_tx, close_rx) = oneshot::channel();
    let close_tx = std::sync::Mutex::new(Some(close_tx));
    session.on_close(move |reason| {
        if let Some(tx) = close_tx.lock().unwrap().take() {
            let _ = tx.send(reason);
        }
    });

    session.start();

    let reason = tokio::time::timeout(Duration::from_secs(2), close_rx)
        .await
        .expect("onClose should fire")
        .unwrap();
    assert_eq!(reason, Some("negotiate unauthorized".to_owned()));
    assert_eq!(session.state(), signalr_client::ConnectionState::Disconnected);
}

/// `invoke`/`send` preconditions: calling before the handshake completes fails fast with
/// `NotConnected` rather than blocking.
#[tokio::test(flavor = "multi_thread")]
async fn invoke_before_connected_fails_fast() {
    let server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .build();
    // never call start(): state stays Disconnected
    let result = session.invoke("add", json!([1, 2]), DEFAULT_INVOKE_TIMEOUT).await;
    assert!(matches!(result, Err(SessionError::NotConnected)));
}

/// `off` leaves no handlers registered, so a later server invocation for that target is dropped
/// silently rather than calling a removed handler.
#[tokio::test(flavor = "multi_thread")]
async fn off_removes_the_handler_before_any_message_arrives() {
    let mut server = WsTestServer::start().await;
    let session = SessionBuilder::new(server.ws_url("/hub"))
        .unwrap()
        .skip_negotiation(true)
        .build();

    let called = Arc::new(AtomicBool::new(false));
    let called_clone = Arc::clone(&called);
    session.on("t", move |_| called_clone.store(true, Ordering::SeqCst)).unwrap();
    session.off("t").unwrap();

    session.start();
    let mut ws = server.accept().await;
    common::recv_json(&mut ws).await;
    send_json(&mut ws, &json!({})).await;
    send_json(&mut ws, &json!({"type": 1, "target": "t", "arguments": []})).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!called.load(Ordering::SeqCst));
}
