//! Integration tests for the notification subscriber.
//!
//! A local `tokio-tungstenite` server plays the part of the pipeline.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use vrcnotif_monitor::audio::{Clip, RecordingAudio};
use vrcnotif_monitor::subscriber::{NotificationSubscriber, ReconnectPolicy, SubscriberConfig};
use vrcnotif_monitor::types::LinkState;

// =============================================================================
// Test Helpers
// =============================================================================

const USER_AGENT: &str = "vrcnotif-test/1.0";

const NOTIFICATION: &str = r#"{"type":"notification","content":"{\"type\":\"friendRequest\",\"senderUsername\":\"Alice\"}"}"#;

const FRIEND_ONLINE: &str = r#"{"type":"friend-online","content":"{\"userId\":\"usr_1\"}"}"#;

/// URI and User-Agent of every handshake the server saw.
type Handshakes = Arc<Mutex<Vec<(String, Option<String>)>>>;

fn recorder(
    handshakes: &Handshakes,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
    let handshakes = Arc::clone(handshakes);
    move |request: &Request, response: Response| {
        let user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        handshakes
            .lock()
            .unwrap()
            .push((request.uri().to_string(), user_agent));
        Ok(response)
    }
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn subscriber(addr: SocketAddr, audio: &RecordingAudio) -> NotificationSubscriber {
    let config = SubscriberConfig::new(format!("ws://{addr}/"), USER_AGENT.to_string())
        .with_policy(ReconnectPolicy::fast_for_tests());
    NotificationSubscriber::new(config, Some("authcookie_test".to_string()), Arc::new(audio.clone()))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition");
}

// =============================================================================
// Subscription Tests
// =============================================================================

/// Notifications chime, other messages do not, and a closed connection is
/// re-established after the backoff.
#[tokio::test]
async fn test_reconnects_after_close_and_filters_messages() {
    let (listener, addr) = bind().await;
    let handshakes: Handshakes = Arc::default();

    let server_handshakes = Arc::clone(&handshakes);
    let server = tokio::spawn(async move {
        // First connection: one notification, one other message, then close.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, recorder(&server_handshakes))
            .await
            .unwrap();
        ws.send(Message::Text(NOTIFICATION.into())).await.unwrap();
        ws.send(Message::Text(FRIEND_ONLINE.into())).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        // Second connection: one notification, then stay open.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, recorder(&server_handshakes))
            .await
            .unwrap();
        ws.send(Message::Text(NOTIFICATION.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let audio = RecordingAudio::new();
    let subscriber = subscriber(addr, &audio);
    let mut state = subscriber.subscribe_state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(subscriber.run(cancel.clone()));

    wait_until(|| audio.play_count(Clip::Notification) == 2).await;
    assert_eq!(audio.calls().len(), 2);

    let link = *state
        .wait_for(|link| link.state == LinkState::Subscribed)
        .await
        .unwrap();
    assert_eq!(link.retry_count, 0);

    {
        let handshakes = handshakes.lock().unwrap();
        assert_eq!(handshakes.len(), 2);
        for (uri, user_agent) in handshakes.iter() {
            assert_eq!(uri, "/?authToken=authcookie_test");
            assert_eq!(user_agent.as_deref(), Some(USER_AGENT));
        }
    }

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(state.borrow().state, LinkState::Disconnected);
    server.await.unwrap();
}

/// A rejected handshake counts as a failure and is retried.
#[tokio::test]
async fn test_rejected_handshake_is_retried() {
    let (listener, addr) = bind().await;
    let attempts = Arc::new(Mutex::new(0u32));

    let server_attempts = Arc::clone(&attempts);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let counter = Arc::clone(&server_attempts);
            let reject = move |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                *counter.lock().unwrap() += 1;
                Err(http::Response::builder()
                    .status(http::StatusCode::UNAUTHORIZED)
                    .body(None)
                    .unwrap())
            };
            let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
        }
    });

    let audio = RecordingAudio::new();
    let subscriber = subscriber(addr, &audio);
    let state = subscriber.subscribe_state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(subscriber.run(cancel.clone()));

    wait_until(|| *attempts.lock().unwrap() >= 3).await;
    assert!(state.borrow().retry_count >= 2);
    assert!(!state.borrow().connected());

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(audio.calls().is_empty());
}

/// Cancelling while subscribed closes the connection promptly.
#[tokio::test]
async fn test_cancel_while_subscribed() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Runs until the client closes.
        let mut saw_close = false;
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                saw_close = true;
            }
        }
        saw_close
    });

    let audio = RecordingAudio::new();
    let subscriber = subscriber(addr, &audio);
    let mut state = subscriber.subscribe_state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(subscriber.run(cancel.clone()));

    state.wait_for(|link| link.connected()).await.unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("Subscriber did not stop")
        .unwrap()
        .unwrap();
    assert!(server.await.unwrap());
}
