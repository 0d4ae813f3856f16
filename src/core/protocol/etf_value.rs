// src/core/protocol/etf_value.rs

//! Defines the structured value model produced and consumed by the wire codec.

use bytes::Bytes;

/// A single decoded term from the gateway's binary serialization format.
///
/// `Atom` is a distinct variant rather than a flavor of string: the server
/// uses interned symbols for constant tags, and the dispatcher must be able
/// to tell them apart from textual data. The reserved atoms `true`, `false`
/// and `nil` never appear as `Atom`; the codec maps them to `Boolean` and
/// `Nil` on decode and back to atoms on encode.
#[derive(Debug, Clone, PartialEq)]
pub enum EtfValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Nil,
    /// A binary that decoded as valid UTF-8.
    Str(String),
    /// A binary that did not decode as UTF-8; kept verbatim.
    Binary(Bytes),
    Atom(String),
    List(Vec<EtfValue>),
    /// Key order is preserved; keys may be arbitrary terms.
    Map(Vec<(EtfValue, EtfValue)>),
}

impl EtfValue {
    /// Builds a map entry list from string keys, the common case for
    /// outbound frames.
    pub fn map_from(entries: Vec<(&str, EtfValue)>) -> Self {
        EtfValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (EtfValue::Str(k.to_string()), v))
                .collect(),
        )
    }

    /// Looks up a map entry whose key is the given text, whether the server
    /// sent it as a binary, a string or an atom.
    pub fn get(&self, key: &str) -> Option<&EtfValue> {
        let EtfValue::Map(entries) = self else {
            return None;
        };
        entries
            .iter()
            .find(|(k, _)| match k {
                EtfValue::Str(s) | EtfValue::Atom(s) => s == key,
                EtfValue::Binary(b) => b.as_ref() == key.as_bytes(),
                _ => false,
            })
            .map(|(_, v)| v)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EtfValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            EtfValue::Integer(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EtfValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, EtfValue::Nil)
    }

    /// Renders the value as JSON for presentation and archiving.
    ///
    /// Atoms become bare names, non-UTF-8 binaries become a hex placeholder,
    /// and map keys are flattened to strings, so the output is always
    /// serializable regardless of what the server sent.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            EtfValue::Integer(i) => Value::from(*i),
            EtfValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            EtfValue::Boolean(b) => Value::Bool(*b),
            EtfValue::Nil => Value::Null,
            EtfValue::Str(s) => Value::String(s.clone()),
            EtfValue::Binary(b) => Value::String(format!("<bytes: {}>", hex_string(b))),
            EtfValue::Atom(a) => Value::String(a.clone()),
            EtfValue::List(items) => Value::Array(items.iter().map(EtfValue::to_json).collect()),
            EtfValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.json_key(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Flattens a map key to the string form used in the JSON rendering.
    fn json_key(&self) -> String {
        match self {
            EtfValue::Str(s) | EtfValue::Atom(s) => s.clone(),
            EtfValue::Binary(b) => format!("<bytes: {}>", hex_string(b)),
            EtfValue::Integer(i) => i.to_string(),
            EtfValue::Float(f) => f.to_string(),
            EtfValue::Boolean(b) => b.to_string(),
            EtfValue::Nil => "nil".to_string(),
            other => other.to_json().to_string(),
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
