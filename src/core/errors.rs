// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the client.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Truncated payload")]
    Truncated,

    #[error("Unknown term tag: {0}")]
    UnknownTag(u8),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Unsupported wire format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Missing required handshake field '{0}'")]
    MissingHandshakeField(&'static str),

    #[error("Heartbeat was not acknowledged before the next tick")]
    HeartbeatTimeout,

    #[error("Send failed: {0}")]
    Send(String),
}

impl GatewayError {
    /// True for failures that affect a single frame and never terminate the
    /// session; the receive loop logs these and continues.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            GatewayError::Truncated
                | GatewayError::UnknownTag(_)
                | GatewayError::Malformed(_)
                | GatewayError::UnsupportedVersion(_)
        )
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(Arc::new(e))
    }
}

impl From<std::string::FromUtf8Error> for GatewayError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GatewayError::Malformed(format!("invalid UTF-8 in term: {e}"))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::Send(e.to_string())
    }
}
