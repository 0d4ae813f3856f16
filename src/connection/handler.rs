// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a
//! gateway connection: connect, handshake, the concurrent receive and
//! heartbeat loops, and teardown.

use crate::config::Config;
use crate::connection::{DispatchOutcome, HeartbeatScheduler, Session, dispatch};
use crate::core::archive::PayloadArchiver;
use crate::core::compression::DecompressionContext;
use crate::core::events::EventSink;
use crate::core::protocol::{self, GatewayPayload, payload};
use crate::core::GatewayError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the serialized outbound channel. Sends are rare (identify,
/// heartbeats, close), so a small buffer suffices.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Manages the full lifecycle of one gateway connection. `connect` runs the
/// connection to completion; reconnect policy belongs to the caller.
pub struct ConnectionHandler {
    config: Arc<Config>,
    session: Arc<Session>,
    events: EventSink,
    archiver: Arc<PayloadArchiver>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// The heartbeat task and the signal that cancels it. Kept together so
/// teardown can always cancel and join, however the receive loop exited.
struct HeartbeatHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            task: None,
        }
    }

    fn started(&self) -> bool {
        self.task.is_some()
    }

    /// Cancels the heartbeat task and waits for it to finish. Mandatory on
    /// every teardown path; an orphaned heartbeat task is a resource leak.
    async fn cancel_and_join(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            if task.await.is_err() {
                warn!("Heartbeat task ended abnormally during teardown");
            }
        }
    }
}

impl ConnectionHandler {
    pub fn new(config: Arc<Config>, events: EventSink, shutdown_rx: broadcast::Receiver<()>) -> Self {
        let archiver = Arc::new(PayloadArchiver::new(&config.archive));
        Self {
            config,
            session: Arc::new(Session::new()),
            events,
            archiver,
            shutdown_rx,
        }
    }

    /// Opens the streaming socket, runs the receive loop, and tears the
    /// session down when the loop exits for any reason. The heartbeat task
    /// is guaranteed to have completed before this returns.
    pub async fn connect(mut self) -> Result<(), GatewayError> {
        self.archiver.prepare().await?;

        let (ws, _response) = connect_async(self.config.gateway.url.as_str()).await?;
        info!("Connected to gateway");

        let (sink, mut stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let writer = tokio::spawn(write_loop(sink, outbound_rx));

        let mut heartbeat = HeartbeatHandle::new();
        let result = self.listen(&mut stream, &outbound_tx, &mut heartbeat).await;
        if let Err(e) = &result {
            error!("Session terminated: {e}");
        }

        // Teardown: cancel and join the heartbeat first, then let the writer
        // drain by closing its channel.
        heartbeat.cancel_and_join().await;
        drop(outbound_tx);
        if writer.await.is_err() {
            warn!("Writer task ended abnormally during teardown");
        }
        info!("Connection teardown complete");
        result
    }

    /// The receive loop: frames in, decompression, decode, dispatch.
    async fn listen(
        &mut self,
        stream: &mut SplitStream<WsStream>,
        outbound_tx: &mpsc::Sender<Message>,
        heartbeat: &mut HeartbeatHandle,
    ) -> Result<(), GatewayError> {
        let mut decompression = DecompressionContext::new()?;

        loop {
            tokio::select! {
                // Prioritize cancellation over inbound traffic.
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Receive loop received shutdown signal.");
                    let _ = outbound_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Binary(frame))) => {
                            match self.process_frame(&frame, &mut decompression, outbound_tx, heartbeat).await {
                                Ok(()) => {}
                                Err(e) if e.is_frame_local() => {
                                    warn!("Dropping undecodable frame: {e}");
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Connection closed by server: {frame:?}");
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Transport-level keep-alives; answered by the
                            // websocket layer itself.
                        }
                        Some(Ok(other)) => {
                            warn!("Ignoring non-binary message: {other:?}");
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            info!("Connection closed by peer.");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// One binary frame through the pipeline. Frame-local failures bubble up
    /// as errors the caller logs and survives; anything else ends the session.
    async fn process_frame(
        &mut self,
        frame: &[u8],
        decompression: &mut DecompressionContext,
        outbound_tx: &mpsc::Sender<Message>,
        heartbeat: &mut HeartbeatHandle,
    ) -> Result<(), GatewayError> {
        let Some(decompressed) = decompression.consume(frame) else {
            // Continuation frame or a dropped frame; nothing to process.
            return Ok(());
        };
        debug!("Decompressed {} bytes", decompressed.len());

        let value = protocol::decode(&decompressed)?;
        let decoded = GatewayPayload::from_value(&value)?;
        let count = self.session.next_message_count();
        info!(
            "Event #{count}: op={}, t={}",
            decoded.op,
            decoded.event_name()
        );

        match serde_json::to_string_pretty(&value.to_json()) {
            Ok(json) => self.archiver.offer(json, decoded.event_name(), count),
            Err(e) => warn!("Payload JSON rendering failed: {e}"),
        }

        match dispatch(&decoded, &self.session)? {
            DispatchOutcome::StartHandshake => {
                if self.start_heartbeat(outbound_tx, heartbeat) {
                    self.identify(outbound_tx).await?;
                }
            }
            DispatchOutcome::Event(event) => self.events.publish(event),
            DispatchOutcome::None => {}
        }
        Ok(())
    }

    /// Starts the heartbeat task, reporting whether it actually started.
    /// The handshake runs at most once per connection; a repeated hello
    /// frame neither restarts the task nor re-sends identify.
    fn start_heartbeat(
        &self,
        outbound_tx: &mpsc::Sender<Message>,
        heartbeat: &mut HeartbeatHandle,
    ) -> bool {
        if heartbeat.started() {
            debug!("Heartbeat task already running, ignoring repeated hello");
            return false;
        }
        let scheduler = HeartbeatScheduler::new(self.session.clone(), outbound_tx.clone());
        let shutdown_rx = heartbeat.shutdown_tx.subscribe();
        heartbeat.task = Some(tokio::spawn(scheduler.run(shutdown_rx)));
        info!("Heartbeat task started");
        true
    }

    /// Sends the identify handshake frame. Sent once, on the first hello.
    async fn identify(&self, outbound_tx: &mpsc::Sender<Message>) -> Result<(), GatewayError> {
        let frame = payload::identify_frame(self.config.token(), &self.config.identify);
        let encoded = protocol::encode(&frame)?;
        outbound_tx.send(Message::Binary(encoded)).await?;
        info!("Identify sent");
        Ok(())
    }
}

/// Owns the websocket sink and serializes every outbound frame through one
/// queue, so the heartbeat loop and the receive loop never interleave writes.
async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!("Socket write failed: {e}");
            break;
        }
        if is_close {
            debug!("Close frame sent, writer stopping.");
            break;
        }
    }
    debug!("Writer task finished.");
}
