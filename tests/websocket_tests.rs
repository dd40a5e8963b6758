//! End-to-end tests: polling monitor over loopback WebSocket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use redis_monitor::api::websocket::SocketState;
use redis_monitor::{
    ChangeBatch, MemoryStore, MonitorConfig, MonitorResult, MonitorServer, Shutdown, Value,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    addr: SocketAddr,
    state: Arc<SocketState>,
    shutdown: Shutdown,
    task: JoinHandle<MonitorResult<()>>,
}

async fn start(store: &MemoryStore, filter: &str) -> Running {
    start_with_period(store, filter, Duration::from_millis(20)).await
}

async fn start_with_period(store: &MemoryStore, filter: &str, period: Duration) -> Running {
    let config = MonitorConfig::default()
        .with_ws_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_http_addr(None)
        .with_poll_period(period)
        .with_key_filter(filter);
    let server = MonitorServer::bind(config, Arc::new(store.clone()))
        .await
        .unwrap();

    let running = Running {
        addr: server.websocket_addr().unwrap(),
        state: server.socket_state(),
        shutdown: server.shutdown_handle(),
        task: tokio::spawn(server.run()),
    };
    // Let the first cycle build the baseline before anyone joins
    tokio::time::sleep(Duration::from_millis(100)).await;
    running
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    socket
}

/// Next text message, skipping control frames.
async fn next_text(socket: &mut Socket) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return text.to_string();
        }
    }
}

async fn next_batch(socket: &mut Socket) -> ChangeBatch {
    serde_json::from_str(&next_text(socket).await).unwrap()
}

/// True if nothing arrives within `wait`.
async fn stays_quiet(socket: &mut Socket, wait: Duration) -> bool {
    tokio::time::timeout(wait, socket.next()).await.is_err()
}

/// Collect batches until `done` holds for the merged updates and deletes.
async fn collect_until<F>(socket: &mut Socket, done: F) -> ChangeBatch
where
    F: Fn(&ChangeBatch) -> bool,
{
    let mut merged = ChangeBatch::default();
    while !done(&merged) {
        let batch = next_batch(socket).await;
        merged.updates.extend(batch.updates);
        merged.deletes.extend(batch.deletes);
    }
    merged
}

fn updated(batch: &ChangeBatch, key: &str) -> Option<Value> {
    batch
        .updates
        .iter()
        .find(|entry| entry.key == key)
        .map(|entry| entry.value.clone())
}

#[tokio::test]
async fn test_snapshot_is_first_message() {
    let store = MemoryStore::new();
    store.set("b", "2");
    store.set("a", "1");
    let running = start(&store, "").await;

    let mut socket = connect(running.addr).await;
    assert_eq!(
        next_text(&mut socket).await,
        r#"{"update":[["a","1"],["b","2"]],"delete":[]}"#
    );
    // Nothing changed since the baseline was built
    assert!(stays_quiet(&mut socket, Duration::from_millis(150)).await);
}

#[tokio::test]
async fn test_updates_and_deletes_are_broadcast() {
    let store = MemoryStore::new();
    store.set("a", "1");
    store.set("b", "2");
    let running = start(&store, "").await;
    let mut socket = connect(running.addr).await;
    next_batch(&mut socket).await;

    store.set("a", "10");
    store.remove("b");
    store.set("c", "3");

    let merged = collect_until(&mut socket, |batch| {
        updated(batch, "a").is_some() && updated(batch, "c").is_some() && !batch.deletes.is_empty()
    })
    .await;
    assert_eq!(updated(&merged, "a"), Some(Value::Text("10".into())));
    assert_eq!(updated(&merged, "c"), Some(Value::Text("3".into())));
    assert_eq!(merged.deletes, vec!["b".to_string()]);
    assert!(updated(&merged, "b").is_none());
}

#[tokio::test]
async fn test_every_client_gets_the_same_batch() {
    let store = MemoryStore::new();
    store.set("seed", "0");
    let running = start(&store, "").await;

    let mut sockets = Vec::new();
    for _ in 0..5 {
        let mut socket = connect(running.addr).await;
        next_batch(&mut socket).await;
        sockets.push(socket);
    }
    assert_eq!(running.state.client_count().await, 5);

    store.set("shared", "value");
    for socket in &mut sockets {
        let batch = next_batch(socket).await;
        assert_eq!(updated(&batch, "shared"), Some(Value::Text("value".into())));
    }
}

#[tokio::test]
async fn test_join_does_not_disturb_existing_clients() {
    let store = MemoryStore::new();
    store.set("a", "1");
    let running = start(&store, "").await;

    let mut first = connect(running.addr).await;
    next_batch(&mut first).await;

    let mut second = connect(running.addr).await;
    let snapshot = next_batch(&mut second).await;
    assert_eq!(updated(&snapshot, "a"), Some(Value::Text("1".into())));

    // The second join must not make the detector resend "a" to the first client
    assert!(stays_quiet(&mut first, Duration::from_millis(150)).await);
}

#[tokio::test]
async fn test_joiner_converges_when_value_reverts() {
    let store = MemoryStore::new();
    store.set("j", "w0");
    // Slow cycle: the join and both writes land between two scans
    let running = start_with_period(&store, "", Duration::from_millis(400)).await;

    store.set("j", "w1");
    let mut socket = connect(running.addr).await;
    let snapshot = next_batch(&mut socket).await;
    assert_eq!(updated(&snapshot, "j"), Some(Value::Text("w1".into())));
    store.set("j", "w0");

    let merged = collect_until(&mut socket, |batch| updated(batch, "j").is_some()).await;
    assert_eq!(updated(&merged, "j"), Some(Value::Text("w0".into())));
}

#[tokio::test]
async fn test_binary_values_survive() {
    let store = MemoryStore::new();
    store.set("blob", vec![0xff, 0x00, 0x10]);
    let running = start(&store, "").await;

    let mut socket = connect(running.addr).await;
    let text = next_text(&mut socket).await;
    assert!(text.contains(r#"{"binary":"/wAQ"}"#));

    let batch: ChangeBatch = serde_json::from_str(&text).unwrap();
    assert_eq!(
        updated(&batch, "blob"),
        Some(Value::Binary(vec![0xff, 0x00, 0x10]))
    );
}

#[tokio::test]
async fn test_key_filter_limits_snapshot_and_updates() {
    let store = MemoryStore::new();
    store.set("user:1", "alice");
    store.set("other", "x");
    store.set_structured("user:list", "list");
    let running = start(&store, "user:").await;

    let mut socket = connect(running.addr).await;
    let snapshot = next_batch(&mut socket).await;
    assert_eq!(snapshot.updates.len(), 1);
    assert_eq!(snapshot.updates[0].key, "user:1");

    store.set("other", "y");
    store.set("user:2", "bob");
    let batch = next_batch(&mut socket).await;
    assert_eq!(batch.updates.len(), 1);
    assert_eq!(batch.updates[0].key, "user:2");
}

#[tokio::test]
async fn test_ping_is_answered() {
    let store = MemoryStore::new();
    let running = start(&store, "").await;
    let mut socket = connect(running.addr).await;
    next_batch(&mut socket).await;

    socket.send(Message::Ping(b"hb".to_vec().into())).await.unwrap();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Pong(payload) = message {
            assert_eq!(&payload[..], b"hb");
            break;
        }
    }
}

#[tokio::test]
async fn test_client_messages_are_ignored() {
    let store = MemoryStore::new();
    let running = start(&store, "").await;
    let mut socket = connect(running.addr).await;
    next_batch(&mut socket).await;

    socket
        .send(Message::Text(r#"{"update":[["x","1"]]}"#.to_string().into()))
        .await
        .unwrap();
    assert!(stays_quiet(&mut socket, Duration::from_millis(150)).await);
    assert!(store.value("x").is_none());
    assert_eq!(running.state.client_count().await, 1);
}

#[tokio::test]
async fn test_disconnected_client_is_removed() {
    let store = MemoryStore::new();
    let running = start(&store, "").await;
    let mut socket = connect(running.addr).await;
    next_batch(&mut socket).await;
    assert_eq!(running.state.client_count().await, 1);

    socket.close(None).await.unwrap();
    drop(socket);

    for _ in 0..50 {
        if running.state.client_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(running.state.client_count().await, 0);
}

#[tokio::test]
async fn test_bad_handshake_is_refused() {
    let store = MemoryStore::new();
    let running = start(&store, "").await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();

    // Refused without an upgrade; the connection is simply closed
    assert!(!response.starts_with(b"HTTP/1.1 101"));
    assert_eq!(running.state.client_count().await, 0);
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let store = MemoryStore::new();
    let running = start(&store, "").await;
    let mut socket = connect(running.addr).await;
    next_batch(&mut socket).await;

    running.shutdown.trigger();
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {:?}", other),
    }

    let result = tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
