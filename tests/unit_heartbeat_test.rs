use gatewire::connection::{HeartbeatScheduler, Session};
use gatewire::core::protocol::{EtfValue, decode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

fn spawn_scheduler(
    session: &Arc<Session>,
) -> (
    mpsc::Receiver<Message>,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = HeartbeatScheduler::new(session.clone(), tx);
    let task = tokio::spawn(scheduler.run(shutdown_rx));
    (rx, shutdown_tx, task)
}

fn decoded_heartbeat(message: Message) -> EtfValue {
    match message {
        Message::Binary(bytes) => decode(&bytes).unwrap(),
        other => panic!("expected a binary heartbeat frame, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_cadence() {
    let session = Arc::new(Session::new());
    session.set_heartbeat_interval_ms(1000);
    let (mut rx, shutdown_tx, task) = spawn_scheduler(&session);

    let start = Instant::now();
    let mut ticks = Vec::new();
    for _ in 0..3 {
        let message = rx.recv().await.unwrap();
        ticks.push(start.elapsed());
        let frame = decoded_heartbeat(message);
        assert_eq!(frame.get("op").and_then(EtfValue::as_i64), Some(1));
        // Prompt acknowledgement keeps the loop alive.
        session.set_heartbeat_acknowledged(true);
    }

    // First beat goes out as soon as the interval is known, then one per tick.
    assert!(ticks[0] < Duration::from_millis(100));
    assert_eq!(ticks[1] - ticks[0], Duration::from_millis(1000));
    assert_eq!(ticks[2] - ticks[1], Duration::from_millis(1000));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_carries_last_sequence() {
    let session = Arc::new(Session::new());
    session.set_heartbeat_interval_ms(1000);

    // No sequence yet: the first heartbeat carries nil.
    let (mut rx, shutdown_tx, task) = spawn_scheduler(&session);
    let frame = decoded_heartbeat(rx.recv().await.unwrap());
    assert!(frame.get("d").unwrap().is_nil());
    session.set_heartbeat_acknowledged(true);

    session.set_sequence(42);
    let frame = decoded_heartbeat(rx.recv().await.unwrap());
    assert_eq!(frame.get("d").and_then(EtfValue::as_i64), Some(42));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missed_ack_closes_connection() {
    let session = Arc::new(Session::new());
    session.set_heartbeat_interval_ms(1000);
    let (mut rx, _shutdown_tx, task) = spawn_scheduler(&session);

    // First heartbeat goes out; nobody acknowledges it.
    let first = rx.recv().await.unwrap();
    assert!(matches!(first, Message::Binary(_)));

    // At the next tick the loop observes the missing ACK, closes and exits.
    let second = rx.recv().await.unwrap();
    assert!(matches!(second, Message::Close(None)));
    task.await.unwrap();

    // No further heartbeat is sent.
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_interval_is_known() {
    let session = Arc::new(Session::new());
    let (mut rx, shutdown_tx, task) = spawn_scheduler(&session);

    // The task idles in bounded waits while the interval is unset.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(rx.try_recv().is_err());

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_joins_mid_interval() {
    let session = Arc::new(Session::new());
    session.set_heartbeat_interval_ms(60_000);
    let (mut rx, shutdown_tx, task) = spawn_scheduler(&session);

    let _ = rx.recv().await.unwrap();

    // Cancellation releases the pending suspension promptly; the task is
    // joined long before the next tick.
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_interval_learned_after_start() {
    let session = Arc::new(Session::new());
    let (mut rx, shutdown_tx, task) = spawn_scheduler(&session);

    // The scheduler starts before the hello frame has been dispatched.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(rx.try_recv().is_err());

    session.set_heartbeat_interval_ms(1000);
    let frame = decoded_heartbeat(rx.recv().await.unwrap());
    assert_eq!(frame.get("op").and_then(EtfValue::as_i64), Some(1));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}
