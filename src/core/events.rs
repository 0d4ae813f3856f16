// src/core/events.rs

//! Defines the outward-facing application events and the bounded channel
//! they are published through.

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::warn;

/// The capacity of the event channel. Large enough for bursts; a consumer
/// that falls this far behind starts losing events rather than stalling the
/// receive loop.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An application-visible event distilled from the gateway traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The session is established and the server confirmed our identity.
    Ready {
        username: String,
        discriminator: String,
    },
    /// A new content message arrived.
    MessageCreate { author: String, content: String },
}

/// The publishing side of the event channel. Publishing never blocks the
/// caller; if the consumer cannot keep up, the event is dropped with a
/// warning.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<GatewayEvent>,
}

impl EventSink {
    /// Creates the sink and the receiver the application consumes from.
    pub fn new() -> (Self, Receiver<GatewayEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: GatewayEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Event sink is full; dropping {event:?}");
            }
            Err(TrySendError::Closed(_)) => {
                // The consumer went away; the session keeps running.
            }
        }
    }
}
