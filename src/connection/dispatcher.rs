// src/connection/dispatcher.rs

//! Interprets decoded payloads and applies their session-state effects.

use crate::connection::Session;
use crate::core::events::GatewayEvent;
use crate::core::protocol::{EtfValue, GatewayPayload, Opcode};
use crate::core::GatewayError;
use tracing::{debug, info};

/// What the connection handler should do after a payload was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No further action; state updates (if any) already happened.
    None,
    /// The hello frame arrived: start the heartbeat loop and send identify.
    StartHandshake,
    /// An application-visible event to publish to the sink.
    Event(GatewayEvent),
}

/// Applies one decoded payload to the session and classifies its effect.
///
/// Sequence tracking happens first and unconditionally for any frame that
/// carries `s`, even when the op-specific handling below is a no-op.
/// Unrecognized operation codes and event types are ignored without error.
pub fn dispatch(
    payload: &GatewayPayload,
    session: &Session,
) -> Result<DispatchOutcome, GatewayError> {
    if let Some(seq) = payload.seq {
        session.set_sequence(seq);
    }

    match Opcode::from_i64(payload.op) {
        Some(Opcode::Hello) => {
            let interval = payload
                .data
                .as_ref()
                .and_then(|d| d.get("heartbeat_interval"))
                .and_then(EtfValue::as_u64)
                // A zero interval would leave the keep-alive loop idle for
                // the life of the connection; treat it as absent.
                .filter(|&ms| ms > 0)
                .ok_or(GatewayError::MissingHandshakeField("heartbeat_interval"))?;
            session.set_heartbeat_interval_ms(interval);
            info!("Hello received (heartbeat interval {interval}ms)");
            Ok(DispatchOutcome::StartHandshake)
        }
        Some(Opcode::HeartbeatAck) => {
            session.set_heartbeat_acknowledged(true);
            info!("Heartbeat ACK");
            Ok(DispatchOutcome::None)
        }
        Some(Opcode::Dispatch) => Ok(dispatch_event(payload)),
        _ => {
            debug!("Ignoring frame with op {}", payload.op);
            Ok(DispatchOutcome::None)
        }
    }
}

/// Handles the named server events the client surfaces outward. A frame
/// lacking the expected inner fields is dropped with a log line; a single
/// odd frame never ends the session.
fn dispatch_event(payload: &GatewayPayload) -> DispatchOutcome {
    let data = payload.data.as_ref();
    match payload.event_type.as_deref() {
        Some("READY") => {
            let user = data.and_then(|d| d.get("user"));
            let username = user.and_then(|u| u.get("username")).and_then(EtfValue::as_str);
            let discriminator = user
                .and_then(|u| u.get("discriminator"))
                .and_then(EtfValue::as_str);
            match (username, discriminator) {
                (Some(username), Some(discriminator)) => {
                    info!("Logged in as {username}#{discriminator}");
                    DispatchOutcome::Event(GatewayEvent::Ready {
                        username: username.to_string(),
                        discriminator: discriminator.to_string(),
                    })
                }
                _ => {
                    debug!("READY frame without user identity fields, skipping");
                    DispatchOutcome::None
                }
            }
        }
        Some("MESSAGE_CREATE") => {
            let author = data
                .and_then(|d| d.get("author"))
                .and_then(|a| a.get("username"))
                .and_then(EtfValue::as_str);
            let content = data.and_then(|d| d.get("content")).and_then(EtfValue::as_str);
            match (author, content) {
                (Some(author), Some(content)) => {
                    info!("[{author}] {content}");
                    DispatchOutcome::Event(GatewayEvent::MessageCreate {
                        author: author.to_string(),
                        content: content.to_string(),
                    })
                }
                _ => {
                    debug!("MESSAGE_CREATE frame without author/content, skipping");
                    DispatchOutcome::None
                }
            }
        }
        Some(other) => {
            debug!("Ignoring event type {other}");
            DispatchOutcome::None
        }
        None => DispatchOutcome::None,
    }
}
