use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use featurestream_sdk::stream::{
    EventHandler, HandlerRegistry, Platform, StreamConfig, StreamConnection, StreamEventName,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const ENV_ID: &str = "env-1";

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<AtomicUsize>,
    observed: Arc<Mutex<Vec<(Method, Option<String>, Value)>>>,
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}

async fn one_shot_stream(State(state): State<ServerState>) -> impl IntoResponse {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    let body = format!(": hello\n\nevent: put\ndata: {{\"hit\":{hit}}}\n\nevent: unknown\ndata: x\n\n");
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn report_stream(
    State(state): State<ServerState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .observed
        .lock()
        .expect("observed lock")
        .push((method, content_type, body));
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        "event: ping\ndata: {}\n\n",
    )
}

async fn unavailable() -> impl IntoResponse {
    StatusCode::SERVICE_UNAVAILABLE
}

fn config(addr: SocketAddr) -> StreamConfig {
    StreamConfig::new(&format!("http://{addr}"), ENV_ID)
        .expect("config")
        .with_reconnect_delay(Duration::from_millis(50))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streams_events_and_reconnects_after_server_closes() {
    let state = ServerState::default();
    let app = Router::new()
        .route("/eval/env-1/:identity", get(one_shot_stream))
        .with_state(state.clone());
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handlers = HandlerRegistry::new().on(
        StreamEventName::Put,
        EventHandler::json(move |value| {
            let _ = tx.send(value);
        }),
    );

    let connection = StreamConnection::new(config(addr), Platform::http()).expect("connection");
    connection.connect(json!({"key": "user-1"}), handlers);

    for expected in 0..3 {
        let value = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for put event")
            .expect("handler channel closed");
        assert_eq!(value, json!({"hit": expected}));
    }
    assert!(state.hits.load(Ordering::SeqCst) >= 3);

    connection.disconnect();
    let _ = shutdown_tx.send(());
    server_task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn report_request_carries_identity_body() {
    let state = ServerState::default();
    let app = Router::new()
        .route("/eval/env-1", any(report_stream))
        .with_state(state.clone());
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handlers = HandlerRegistry::new().on(
        StreamEventName::Ping,
        EventHandler::raw(move |data| {
            let _ = tx.send(data.to_string());
        }),
    );

    let identity = json!({"key": "user-1", "custom": {"plan": "pro"}});
    let connection = StreamConnection::new(config(addr).with_report(true), Platform::http())
        .expect("connection");
    connection.connect(identity.clone(), handlers);

    let data = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for ping event")
        .expect("handler channel closed");
    assert_eq!(data, "{}");
    connection.disconnect();

    let observed = state.observed.lock().expect("observed lock").clone();
    let (method, content_type, body) = observed.first().expect("at least one request");
    assert_eq!(method.as_str(), "REPORT");
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, &identity);

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_status_keeps_connection_closed_and_retries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().route(
        "/eval/env-1/:identity",
        get(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            unavailable()
        }),
    );
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let connection = StreamConnection::new(config(addr), Platform::http()).expect("connection");
    connection.connect(json!({"key": "user-1"}), HandlerRegistry::new());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hits.load(Ordering::SeqCst) < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected the stream to retry"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!connection.is_connected());

    connection.disconnect();
    let _ = shutdown_tx.send(());
    server_task.await.expect("mock server task should join");
}
