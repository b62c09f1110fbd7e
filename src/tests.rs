//! End-to-end tests against an in-process [`BayeuxTransport`] double.
//!
//! There is no mocking crate anywhere in the corpus this client was grounded
//! on, so — mirroring the teacher's own hand-rolled `TestHandler` — these
//! tests script a fake transport directly rather than reaching for an
//! unprecedented dependency.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::{BayeuxError, BayeuxTransport, Session};

/// Installs a `tracing` subscriber writing to the test harness's captured
/// output, so `tracing::debug!`/`warn!` calls inside the workers show up
/// under `cargo test -- --nocapture`. Safe to call from more than one test;
/// only the first call wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A [`BayeuxTransport`] that answers from a per-channel script, falling
/// back to an empty `/meta/connect`-shaped batch once a channel's script is
/// exhausted so a Connector can long-poll harmlessly forever.
struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<Option<Value>, BayeuxError>>>>,
    calls: Mutex<Vec<Value>>,
    timeouts: Mutex<Vec<Option<Duration>>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    async fn script(&self, channel: &str, result: Result<Option<Value>, BayeuxError>) {
        self.responses
            .lock()
            .await
            .entry(channel.to_owned())
            .or_default()
            .push_back(result);
    }

    async fn calls_on(&self, channel: &str) -> Vec<Value> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|body| body.get("channel").and_then(Value::as_str) == Some(channel))
            .cloned()
            .collect()
    }

    /// The `timeout` arguments passed to `post` for calls on `channel`, in
    /// call order, paired positionally with [`ScriptedTransport::calls_on`].
    async fn timeouts_on(&self, channel: &str) -> Vec<Option<Duration>> {
        let calls = self.calls.lock().await;
        let timeouts = self.timeouts.lock().await;
        calls
            .iter()
            .zip(timeouts.iter())
            .filter(|(body, _)| body.get("channel").and_then(Value::as_str) == Some(channel))
            .map(|(_, timeout)| *timeout)
            .collect()
    }
}

#[async_trait]
impl BayeuxTransport for ScriptedTransport {
    async fn post(
        &self,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, BayeuxError> {
        self.calls.lock().await.push(body.clone());
        self.timeouts.lock().await.push(timeout);
        let channel = body
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let scripted = self
            .responses
            .lock()
            .await
            .get_mut(&channel)
            .and_then(VecDeque::pop_front);

        scripted.unwrap_or_else(|| Ok(Some(Value::Array(Vec::new()))))
    }
}

fn handshake_response(client_id: &str) -> Result<Option<Value>, BayeuxError> {
    Ok(Some(json!([{
        "channel": "/meta/handshake",
        "successful": true,
        "clientId": client_id,
        "version": "1.0",
        "supportedConnectionTypes": ["long-polling"],
    }])))
}

fn connect_response() -> Result<Option<Value>, BayeuxError> {
    Ok(Some(json!([{
        "channel": "/meta/connect",
        "successful": true,
        "advice": {"reconnect": "retry", "interval": 0, "timeout": 45_000},
    }])))
}

fn session_lost_response() -> Result<Option<Value>, BayeuxError> {
    Ok(Some(json!([{
        "channel": "/meta/connect",
        "successful": false,
        "error": "403::Unknown client",
        "advice": {"reconnect": "handshake"},
    }])))
}

async fn build_session(transport: Arc<ScriptedTransport>, auto_start: bool) -> Session {
    Session::builder("http://test.invalid/cometd")
        .transport(transport)
        .auto_start(auto_start)
        .build()
        .await
        .expect("build should succeed against a scripted handshake")
}

#[tokio::test]
async fn handshake_establishes_client_id_and_connect_timeout() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let _session = build_session(Arc::clone(&transport), false).await;

    let handshakes = transport.calls_on("/meta/handshake").await;
    assert_eq!(handshakes.len(), 1);

    let connects = transport.calls_on("/meta/connect").await;
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0]["clientId"], json!("client-1"));
    assert_eq!(connects[0]["id"], json!("1"));
}

#[tokio::test]
async fn subscribing_the_same_channel_twice_sends_one_subscribe() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let session = build_session(Arc::clone(&transport), true).await;

    session
        .subscribe("/topic/a", Arc::new(|_event| {}))
        .await;
    session
        .subscribe("/topic/a", Arc::new(|_event| {}))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let subscribes = transport.calls_on("/meta/subscribe").await;
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0]["subscription"], json!("/topic/a"));

    session.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_removes_callbacks_immediately() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let session = build_session(Arc::clone(&transport), true).await;

    session.subscribe("/topic/a", Arc::new(|_event| {})).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    session.unsubscribe("/topic/a").await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let unsubscribes = transport.calls_on("/meta/unsubscribe").await;
    assert_eq!(unsubscribes.len(), 1);
    assert_eq!(unsubscribes[0]["subscription"], json!("/topic/a"));

    session.shutdown().await;
}

#[tokio::test]
async fn unknown_client_on_connect_triggers_rehandshake_and_resubscribe() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;
    // First long-poll from the Connector reports session loss...
    transport.script("/meta/connect", session_lost_response()).await;
    // ...triggering a fresh handshake...
    transport.script("/meta/handshake", handshake_response("client-2")).await;

    let session = build_session(Arc::clone(&transport), true).await;

    session
        .subscribe("/topic/a", Arc::new(|_event| {}))
        .await;

    tokio::time::sleep(Duration::from_millis(80)).await;

    let handshakes = transport.calls_on("/meta/handshake").await;
    assert_eq!(handshakes.len(), 2);

    let connects = transport.calls_on("/meta/connect").await;
    let last_connect = connects.last().expect("at least one connect after recovery");
    assert_eq!(last_connect["clientId"], json!("client-2"));

    // The pre-recovery subscription must have been replayed.
    let subscribes = transport.calls_on("/meta/subscribe").await;
    assert!(subscribes.iter().any(|s| s["clientId"] == json!("client-2")));

    session.shutdown().await;
}

#[tokio::test]
async fn repeated_subscribe_timeouts_become_a_fatal_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;
    for _ in 0..3 {
        transport
            .script(
                "/meta/subscribe",
                Err(BayeuxError::TransportTimeout(Duration::from_secs(1))),
            )
            .await;
    }

    let session = Session::builder("http://test.invalid/cometd")
        .transport(Arc::clone(&transport) as Arc<dyn BayeuxTransport>)
        .successive_timeout_threshold(2)
        .timeout_wait(Duration::from_millis(1))
        .auto_start(true)
        .build()
        .await
        .expect("build should succeed");

    session.subscribe("/topic/a", Arc::new(|_event| {})).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = session.block().await;
    claims::assert_matches!(result, Err(BayeuxError::RepeatedTimeout("Subscriber")));
}

#[tokio::test]
async fn concurrent_shutdown_calls_disconnect_exactly_once() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let session = build_session(Arc::clone(&transport), true).await;

    tokio::join!(session.shutdown(), session.shutdown());

    let disconnects = transport.calls_on("/meta/disconnect").await;
    assert_eq!(disconnects.len(), 1);
}

#[tokio::test]
async fn pushed_event_payload_is_the_unwrapped_data_field() {
    init_tracing();

    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;
    transport
        .script(
            "/meta/connect",
            Ok(Some(json!([{
                "channel": "/topic/news",
                "data": {"v": 1},
            }, {
                "channel": "/topic/news",
                "data": {"v": 2},
            }]))),
        )
        .await;

    let session = build_session(Arc::clone(&transport), true).await;

    let received: Arc<std::sync::Mutex<Vec<Value>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_in_callback = Arc::clone(&received);
    session
        .subscribe(
            "/topic/news",
            Arc::new(move |event| received_in_callback.lock().unwrap().push(event.payload)),
        )
        .await;

    session.go().await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let payloads = received.lock().unwrap().clone();
    assert_eq!(payloads, vec![json!({"v": 1}), json!({"v": 2})]);

    session.shutdown().await;
}

#[tokio::test]
async fn publish_request_has_the_channel_data_client_id_and_id_shape() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let session = build_session(Arc::clone(&transport), true).await;

    session.publish("/topic/news", json!({"v": 1}));

    tokio::time::sleep(Duration::from_millis(30)).await;

    let publishes = transport.calls_on("/topic/news").await;
    assert_eq!(publishes.len(), 1);
    let body = &publishes[0];
    assert_eq!(
        body.as_object().map(|object| {
            let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys
        }),
        Some(vec!["channel", "clientId", "data", "id"])
    );
    assert_eq!(body["channel"], json!("/topic/news"));
    assert_eq!(body["data"], json!({"v": 1}));
    assert_eq!(body["clientId"], json!("client-1"));

    session.shutdown().await;
}

#[tokio::test]
async fn subsequent_connects_use_the_server_advised_timeout() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let session = build_session(Arc::clone(&transport), true).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let connect_timeouts = transport.timeouts_on("/meta/connect").await;
    assert!(connect_timeouts.len() >= 2);
    // The one-off initial connect (§4.1) carries no client-side timeout...
    assert_eq!(connect_timeouts[0], None);
    // ...but every connect after it uses the `advice.timeout` the server
    // handed back on that initial connect (45s in `connect_response`).
    assert_eq!(connect_timeouts[1], Some(Duration::from_secs(45)));

    session.shutdown().await;
}

#[tokio::test]
async fn dispatcher_holds_delivery_until_recovery_completes() {
    // The real recovery sequence (re-handshake, then resubscribe) holds
    // `recovery_in_progress` for far too short a window to race against
    // reliably, so this drives the flag directly through the test-only seam
    // rather than timing a live re-handshake (covered separately by
    // `unknown_client_on_connect_triggers_rehandshake_and_resubscribe`).
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;
    transport
        .script(
            "/meta/connect",
            Ok(Some(json!([{
                "channel": "/topic/news",
                "data": {"v": 1},
            }]))),
        )
        .await;

    let session = build_session(Arc::clone(&transport), true).await;

    let received: Arc<std::sync::Mutex<Vec<Value>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_in_callback = Arc::clone(&received);
    session
        .subscribe(
            "/topic/news",
            Arc::new(move |event| received_in_callback.lock().unwrap().push(event.payload)),
        )
        .await;

    session.set_recovery_in_progress_for_test(true);
    session.go().await;

    // The event is already in flight from the Connector's long-poll, but the
    // Dispatcher must hold it while recovery is (synthetically) in progress.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(
        received.lock().unwrap().is_empty(),
        "no callback should fire while recovery_in_progress is true"
    );

    session.set_recovery_in_progress_for_test(false);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(received.lock().unwrap().clone(), vec![json!({"v": 1})]);

    session.shutdown().await;
}

#[tokio::test]
async fn standalone_disconnect_sends_one_request() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("/meta/handshake", handshake_response("client-1")).await;
    transport.script("/meta/connect", connect_response()).await;

    let session = build_session(Arc::clone(&transport), false).await;
    session.disconnect().await.expect("disconnect should succeed");

    let disconnects = transport.calls_on("/meta/disconnect").await;
    assert_eq!(disconnects.len(), 1);
}
