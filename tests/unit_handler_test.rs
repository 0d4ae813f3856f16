use futures::{SinkExt, StreamExt};
use gatewire::config::Config;
use gatewire::connection::ConnectionHandler;
use gatewire::core::events::{EventSink, GatewayEvent};
use gatewire::core::protocol::{self, EtfValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

fn test_config(url: String, archive_dir: &std::path::Path) -> Arc<Config> {
    let mut config = Config::default();
    config.gateway.url = url;
    config.gateway.token = "test-token".to_string();
    config.archive.dir = archive_dir.to_string_lossy().into_owned();
    config.archive.min_len = usize::MAX;
    Arc::new(config)
}

/// Encodes a payload and wraps it the way the server side of the wire does:
/// one compressed frame per message, sharing the client's stream context.
fn compressed_frame(payload: &EtfValue) -> Message {
    let encoded = protocol::encode(payload).unwrap();
    Message::binary(zstd::encode_all(&encoded[..], 0).unwrap())
}

fn hello_payload(interval_ms: i64) -> EtfValue {
    EtfValue::map_from(vec![
        ("op", EtfValue::Integer(10)),
        (
            "d",
            EtfValue::map_from(vec![("heartbeat_interval", EtfValue::Integer(interval_ms))]),
        ),
    ])
}

fn ack_payload() -> EtfValue {
    EtfValue::map_from(vec![("op", EtfValue::Integer(11))])
}

fn ready_payload() -> EtfValue {
    EtfValue::map_from(vec![
        ("op", EtfValue::Integer(0)),
        ("t", EtfValue::Str("READY".to_string())),
        ("s", EtfValue::Integer(1)),
        (
            "d",
            EtfValue::map_from(vec![(
                "user",
                EtfValue::map_from(vec![
                    ("username", EtfValue::Str("ada".to_string())),
                    ("discriminator", EtfValue::Str("0001".to_string())),
                ]),
            )]),
        ),
    ])
}

/// Client frames go out uncompressed; pull the op code back out of one.
fn frame_op(frame: &[u8]) -> i64 {
    protocol::decode(frame)
        .unwrap()
        .get("op")
        .and_then(EtfValue::as_i64)
        .unwrap()
}

#[tokio::test]
async fn test_repeated_hello_sends_exactly_one_identify() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // A server that greets twice. Only the first hello may trigger the
    // identify handshake; the duplicate must change nothing.
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        ws.send(compressed_frame(&hello_payload(60_000))).await.unwrap();
        ws.send(compressed_frame(&hello_payload(60_000))).await.unwrap();

        let mut ops = Vec::new();
        let mut ready_sent = false;
        while let Some(message) = ws.next().await {
            match message.unwrap() {
                Message::Binary(frame) => {
                    ops.push(frame_op(&frame));
                    if !ready_sent && ops.contains(&2) {
                        ws.send(compressed_frame(&ack_payload())).await.unwrap();
                        ws.send(compressed_frame(&ready_payload())).await.unwrap();
                        ready_sent = true;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        ops
    });

    let dir = tempfile::tempdir().unwrap();
    let (sink, mut events_rx) = EventSink::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handler = ConnectionHandler::new(test_config(format!("ws://{addr}"), dir.path()), sink, shutdown_rx);
    let client = tokio::spawn(handler.connect());

    // The identity event proves the whole inbound ordering was processed:
    // both hellos came before the ready frame on the same stream.
    let event = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("session should reach the ready event")
        .unwrap();
    assert_eq!(
        event,
        GatewayEvent::Ready {
            username: "ada".to_string(),
            discriminator: "0001".to_string(),
        }
    );

    shutdown_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
    assert!(result.is_ok());

    let ops = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(
        ops.iter().filter(|&&op| op == 2).count(),
        1,
        "identify must be sent exactly once, repeated hello or not"
    );
    assert!(ops.contains(&1), "a heartbeat should follow the handshake");
}

#[tokio::test]
async fn test_shutdown_tears_down_an_active_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // A short interval keeps the heartbeat loop genuinely active while the
    // shutdown lands; the server acks every beat and reports them outward.
    let (beat_tx, mut beat_rx) = tokio::sync::mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        ws.send(compressed_frame(&hello_payload(50))).await.unwrap();

        let mut saw_close = false;
        while let Some(message) = ws.next().await {
            match message.unwrap() {
                Message::Binary(frame) => {
                    if frame_op(&frame) == 1 {
                        ws.send(compressed_frame(&ack_payload())).await.unwrap();
                        let _ = beat_tx.send(());
                    }
                }
                Message::Close(_) => {
                    saw_close = true;
                    break;
                }
                _ => {}
            }
        }
        saw_close
    });

    let dir = tempfile::tempdir().unwrap();
    let (sink, _events_rx) = EventSink::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handler = ConnectionHandler::new(test_config(format!("ws://{addr}"), dir.path()), sink, shutdown_rx);
    let client = tokio::spawn(handler.connect());

    // Two acknowledged beats: the keep-alive loop is mid-flight.
    timeout(Duration::from_secs(5), beat_rx.recv()).await.unwrap().unwrap();
    timeout(Duration::from_secs(5), beat_rx.recv()).await.unwrap().unwrap();

    shutdown_tx.send(()).unwrap();
    // Teardown joins the heartbeat and the writer before connect returns;
    // a leaked task would hang here instead.
    let result = timeout(Duration::from_secs(5), client)
        .await
        .expect("connect() must return promptly after the shutdown signal")
        .unwrap();
    assert!(result.is_ok());

    let saw_close = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(saw_close, "the session should announce the close before going away");
}

#[tokio::test]
async fn test_server_close_ends_session_cleanly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        ws.send(compressed_frame(&hello_payload(60_000))).await.unwrap();

        // Wait for the handshake, then hang up from the server side.
        while let Some(message) = ws.next().await {
            if let Message::Binary(frame) = message.unwrap() {
                if frame_op(&frame) == 2 {
                    break;
                }
            }
        }
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let dir = tempfile::tempdir().unwrap();
    let (sink, _events_rx) = EventSink::new();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handler = ConnectionHandler::new(test_config(format!("ws://{addr}"), dir.path()), sink, shutdown_rx);

    let result = timeout(Duration::from_secs(5), handler.connect()).await.unwrap();
    assert!(result.is_ok(), "a server-initiated close is a clean exit");
    server.await.unwrap();
}
