// src/core/protocol/payload.rs

//! Defines the typed envelope above raw terms and the builders for the
//! handful of outbound frames the client ever sends.

use crate::config::IdentifyConfig;
use crate::core::GatewayError;
use crate::core::protocol::EtfValue;

/// The operation codes the dispatcher understands. Anything else is ignored
/// for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Dispatch,
    Heartbeat,
    Identify,
    Hello,
    HeartbeatAck,
}

impl Opcode {
    pub fn from_i64(op: i64) -> Option<Self> {
        match op {
            0 => Some(Opcode::Dispatch),
            1 => Some(Opcode::Heartbeat),
            2 => Some(Opcode::Identify),
            10 => Some(Opcode::Hello),
            11 => Some(Opcode::HeartbeatAck),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Opcode::Dispatch => 0,
            Opcode::Heartbeat => 1,
            Opcode::Identify => 2,
            Opcode::Hello => 10,
            Opcode::HeartbeatAck => 11,
        }
    }
}

/// A decoded inbound frame: `op` plus the optional `t`/`s`/`d` fields.
/// The shape of `d` is opaque at this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPayload {
    pub op: i64,
    pub event_type: Option<String>,
    pub seq: Option<u64>,
    pub data: Option<EtfValue>,
}

impl GatewayPayload {
    /// Interprets a decoded term as the standard payload envelope.
    pub fn from_value(value: &EtfValue) -> Result<Self, GatewayError> {
        let op = value
            .get("op")
            .and_then(EtfValue::as_i64)
            .ok_or_else(|| GatewayError::Malformed("payload missing 'op'".to_string()))?;

        let event_type = value.get("t").and_then(|t| match t {
            EtfValue::Str(s) => Some(s.clone()),
            EtfValue::Atom(a) => Some(a.clone()),
            _ => None,
        });

        let seq = value.get("s").and_then(EtfValue::as_u64);

        let data = value.get("d").and_then(|d| {
            if d.is_nil() {
                None
            } else {
                Some(d.clone())
            }
        });

        Ok(Self {
            op,
            event_type,
            seq,
            data,
        })
    }

    /// The event name used for log correlation and archive file naming.
    pub fn event_name(&self) -> &str {
        self.event_type.as_deref().unwrap_or("unknown")
    }
}

/// Builds the keep-alive frame: `{op: 1, d: <last seen sequence or nil>}`.
pub fn heartbeat_frame(sequence: Option<u64>) -> EtfValue {
    EtfValue::map_from(vec![
        ("op", EtfValue::Integer(Opcode::Heartbeat.as_i64())),
        (
            "d",
            sequence.map_or(EtfValue::Nil, |s| EtfValue::Integer(s as i64)),
        ),
    ])
}

/// Builds the identify handshake frame carrying the credential token and the
/// static client descriptors.
pub fn identify_frame(token: &str, identify: &IdentifyConfig) -> EtfValue {
    EtfValue::map_from(vec![
        ("op", EtfValue::Integer(Opcode::Identify.as_i64())),
        (
            "d",
            EtfValue::map_from(vec![
                ("token", EtfValue::Str(token.to_string())),
                ("capabilities", EtfValue::Integer(identify.capabilities)),
                (
                    "properties",
                    EtfValue::map_from(vec![
                        ("os", EtfValue::Str(identify.os.clone())),
                        ("browser", EtfValue::Str(identify.browser.clone())),
                        ("device", EtfValue::Str(identify.device.clone())),
                    ]),
                ),
                (
                    "presence",
                    EtfValue::map_from(vec![
                        ("status", EtfValue::Str("online".to_string())),
                        ("since", EtfValue::Integer(0)),
                        ("activities", EtfValue::List(Vec::new())),
                        ("afk", EtfValue::Boolean(false)),
                    ]),
                ),
                ("compress", EtfValue::Boolean(true)),
            ]),
        ),
    ])
}
