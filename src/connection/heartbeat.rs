// src/connection/heartbeat.rs

//! The concurrent keep-alive task for one connection.

use crate::connection::Session;
use crate::core::protocol::{self, payload};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// How long to idle between re-checks while the heartbeat interval is not
/// yet known. Guards against the task starting before the hello frame has
/// been dispatched.
const IDLE_RECHECK: Duration = Duration::from_secs(1);

/// Sends periodic keep-alive frames and enforces the acknowledgement-timeout
/// disconnect. Started exactly once per connection, after the hello frame.
pub struct HeartbeatScheduler {
    session: Arc<Session>,
    outbound: mpsc::Sender<Message>,
}

impl HeartbeatScheduler {
    pub fn new(session: Arc<Session>, outbound: mpsc::Sender<Message>) -> Self {
        Self { session, outbound }
    }

    /// Runs the heartbeat loop until cancelled or a terminal condition.
    ///
    /// A missed acknowledgement closes the connection: the close frame goes
    /// out through the serialized writer, the server ends the stream, and
    /// the receive loop observes the closure and tears the session down.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Heartbeat task started.");
        loop {
            let Some(interval_ms) = self.session.heartbeat_interval_ms() else {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_RECHECK) => continue,
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat task cancelled before the interval was known.");
                        return;
                    }
                }
            };

            if !self.session.heartbeat_acknowledged() {
                error!("{}; closing connection", crate::core::GatewayError::HeartbeatTimeout);
                let _ = self.outbound.send(Message::Close(None)).await;
                return;
            }

            if let Err(e) = self.send_heartbeat().await {
                warn!("Heartbeat send failed, stopping: {e}");
                return;
            }
            self.session.set_heartbeat_acknowledged(false);
            info!("Heartbeat sent");

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                _ = shutdown_rx.recv() => {
                    info!("Heartbeat task cancelled.");
                    return;
                }
            }
        }
    }

    async fn send_heartbeat(&self) -> Result<(), crate::core::GatewayError> {
        let frame = payload::heartbeat_frame(self.session.sequence());
        let encoded = protocol::encode(&frame)?;
        self.outbound.send(Message::Binary(encoded)).await?;
        Ok(())
    }
}
