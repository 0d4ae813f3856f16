// src/core/mod.rs

//! The central module containing the protocol logic and data structures of gatewire.

pub mod archive;
pub mod compression;
pub mod errors;
pub mod events;
pub mod protocol;

pub use errors::GatewayError;
pub use events::{EventSink, GatewayEvent};
pub use protocol::{EtfValue, GatewayPayload, Opcode};
