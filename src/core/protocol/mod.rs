// src/core/protocol/mod.rs

//! The binary wire serialization layer: the term value model, the codec that
//! turns terms into bytes and back, and the typed payload envelope above them.

pub mod etf_codec;
pub mod etf_value;
pub mod payload;

pub use etf_codec::{decode, encode};
pub use etf_value::EtfValue;
pub use payload::{GatewayPayload, Opcode};
