// src/core/protocol/etf_codec.rs

//! Implements the external-term binary serialization format used on the
//! gateway wire: a one-byte format version followed by a tagged term tree.
//!
//! Only the tag subset the gateway traffic actually uses is supported. The
//! decoder is total over arbitrary input: truncated buffers, unknown tags
//! and oversized integers all surface as errors without touching any state
//! outside the local cursor.

use crate::core::GatewayError;
use crate::core::protocol::EtfValue;
use bytes::{BufMut, Bytes, BytesMut};

/// The format version byte every payload starts with.
const FORMAT_VERSION: u8 = 131;

const SMALL_INTEGER_EXT: u8 = 97;
const INTEGER_EXT: u8 = 98;
const FLOAT_EXT: u8 = 99;
const NEW_FLOAT_EXT: u8 = 70;
const ATOM_EXT: u8 = 100;
const SMALL_TUPLE_EXT: u8 = 104;
const LARGE_TUPLE_EXT: u8 = 105;
const NIL_EXT: u8 = 106;
const STRING_EXT: u8 = 107;
const LIST_EXT: u8 = 108;
const BINARY_EXT: u8 = 109;
const SMALL_BIG_EXT: u8 = 110;
const LARGE_BIG_EXT: u8 = 111;
const SMALL_ATOM_EXT: u8 = 115;
const MAP_EXT: u8 = 116;
const ATOM_UTF8_EXT: u8 = 118;
const SMALL_ATOM_UTF8_EXT: u8 = 119;

// Protocol-level limits to keep a malformed frame from ballooning memory.
const MAX_CONTAINER_ELEMENTS: usize = 1_024 * 1_024;
const MAX_RECURSION_DEPTH: usize = 256;

/// Encodes a term tree into a complete wire payload, version byte included.
pub fn encode(value: &EtfValue) -> Result<Bytes, GatewayError> {
    let mut dst = BytesMut::with_capacity(64);
    dst.put_u8(FORMAT_VERSION);
    encode_term(value, &mut dst)?;
    Ok(dst.freeze())
}

/// Decodes one term tree from a complete wire payload.
///
/// Trailing bytes after the first term are ignored, mirroring the reference
/// unpacker for this format.
pub fn decode(bytes: &[u8]) -> Result<EtfValue, GatewayError> {
    let mut cursor = bytes;
    let version = read_u8(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(GatewayError::UnsupportedVersion(version));
    }
    decode_recursive(&mut cursor, 0)
}

fn encode_term(value: &EtfValue, dst: &mut BytesMut) -> Result<(), GatewayError> {
    match value {
        EtfValue::Integer(i) => encode_integer(*i, dst),
        EtfValue::Float(f) => {
            dst.put_u8(NEW_FLOAT_EXT);
            dst.put_u64(f.to_bits());
        }
        EtfValue::Boolean(true) => encode_atom("true", dst)?,
        EtfValue::Boolean(false) => encode_atom("false", dst)?,
        EtfValue::Nil => encode_atom("nil", dst)?,
        EtfValue::Atom(name) => encode_atom(name, dst)?,
        EtfValue::Str(s) => encode_binary(s.as_bytes(), dst)?,
        EtfValue::Binary(b) => encode_binary(b, dst)?,
        EtfValue::List(items) => {
            if items.is_empty() {
                dst.put_u8(NIL_EXT);
            } else {
                let len = u32::try_from(items.len())
                    .map_err(|_| GatewayError::Malformed("list too long to encode".into()))?;
                dst.put_u8(LIST_EXT);
                dst.put_u32(len);
                for item in items {
                    encode_term(item, dst)?;
                }
                // Proper lists carry an explicit empty-list tail.
                dst.put_u8(NIL_EXT);
            }
        }
        EtfValue::Map(entries) => {
            let arity = u32::try_from(entries.len())
                .map_err(|_| GatewayError::Malformed("map too large to encode".into()))?;
            dst.put_u8(MAP_EXT);
            dst.put_u32(arity);
            for (key, val) in entries {
                encode_term(key, dst)?;
                encode_term(val, dst)?;
            }
        }
    }
    Ok(())
}

fn encode_integer(i: i64, dst: &mut BytesMut) {
    if (0..=255).contains(&i) {
        dst.put_u8(SMALL_INTEGER_EXT);
        dst.put_u8(i as u8);
    } else if let Ok(small) = i32::try_from(i) {
        dst.put_u8(INTEGER_EXT);
        dst.put_i32(small);
    } else {
        // Wider integers go out as a little-endian magnitude with a sign byte.
        let magnitude = i.unsigned_abs();
        let le = magnitude.to_le_bytes();
        let used = le.iter().rposition(|b| *b != 0).map_or(1, |p| p + 1);
        dst.put_u8(SMALL_BIG_EXT);
        dst.put_u8(used as u8);
        dst.put_u8(if i < 0 { 1 } else { 0 });
        dst.put_slice(&le[..used]);
    }
}

fn encode_atom(name: &str, dst: &mut BytesMut) -> Result<(), GatewayError> {
    let len = u16::try_from(name.len())
        .map_err(|_| GatewayError::Malformed(format!("atom too long to encode: {name}")))?;
    dst.put_u8(ATOM_EXT);
    dst.put_u16(len);
    dst.put_slice(name.as_bytes());
    Ok(())
}

fn encode_binary(data: &[u8], dst: &mut BytesMut) -> Result<(), GatewayError> {
    let len = u32::try_from(data.len())
        .map_err(|_| GatewayError::Malformed("binary too long to encode".into()))?;
    dst.put_u8(BINARY_EXT);
    dst.put_u32(len);
    dst.put_slice(data);
    Ok(())
}

/// A recursive helper to decode one term. The `bytes` cursor is advanced as
/// it is parsed; `depth` tracks recursion level to prevent stack overflow.
fn decode_recursive(bytes: &mut &[u8], depth: usize) -> Result<EtfValue, GatewayError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(GatewayError::Malformed(
            "term recursion depth limit exceeded".to_string(),
        ));
    }

    let tag = read_u8(bytes)?;
    match tag {
        SMALL_INTEGER_EXT => Ok(EtfValue::Integer(read_u8(bytes)? as i64)),
        INTEGER_EXT => Ok(EtfValue::Integer(read_i32(bytes)? as i64)),
        NEW_FLOAT_EXT => {
            let raw = take(bytes, 8)?;
            let bits = u64::from_be_bytes(raw.try_into().expect("slice length checked"));
            Ok(EtfValue::Float(f64::from_bits(bits)))
        }
        FLOAT_EXT => parse_legacy_float(bytes),
        ATOM_EXT | ATOM_UTF8_EXT => {
            let len = read_u16(bytes)? as usize;
            parse_atom(bytes, len)
        }
        SMALL_ATOM_EXT | SMALL_ATOM_UTF8_EXT => {
            let len = read_u8(bytes)? as usize;
            parse_atom(bytes, len)
        }
        NIL_EXT => Ok(EtfValue::List(Vec::new())),
        STRING_EXT => {
            // A byte-list shorthand; surfaced as text when it is valid UTF-8.
            let len = read_u16(bytes)? as usize;
            Ok(binary_value(take(bytes, len)?))
        }
        BINARY_EXT => {
            let len = read_u32(bytes)? as usize;
            Ok(binary_value(take(bytes, len)?))
        }
        LIST_EXT => parse_list(bytes, depth),
        SMALL_TUPLE_EXT => {
            let arity = read_u8(bytes)? as usize;
            parse_sequence(bytes, arity, depth)
        }
        LARGE_TUPLE_EXT => {
            let arity = read_u32(bytes)? as usize;
            parse_sequence(bytes, arity, depth)
        }
        SMALL_BIG_EXT => {
            let n = read_u8(bytes)? as usize;
            parse_big_integer(bytes, n)
        }
        LARGE_BIG_EXT => {
            let n = read_u32(bytes)? as usize;
            parse_big_integer(bytes, n)
        }
        MAP_EXT => parse_map(bytes, depth),
        other => Err(GatewayError::UnknownTag(other)),
    }
}

/// Splits `n` bytes off the front of the cursor, or fails on truncation.
fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], GatewayError> {
    if bytes.len() < n {
        return Err(GatewayError::Truncated);
    }
    let (head, rest) = bytes.split_at(n);
    *bytes = rest;
    Ok(head)
}

fn read_u8(bytes: &mut &[u8]) -> Result<u8, GatewayError> {
    Ok(take(bytes, 1)?[0])
}

fn read_u16(bytes: &mut &[u8]) -> Result<u16, GatewayError> {
    let raw = take(bytes, 2)?;
    Ok(u16::from_be_bytes(raw.try_into().expect("slice length checked")))
}

fn read_u32(bytes: &mut &[u8]) -> Result<u32, GatewayError> {
    let raw = take(bytes, 4)?;
    Ok(u32::from_be_bytes(raw.try_into().expect("slice length checked")))
}

fn read_i32(bytes: &mut &[u8]) -> Result<i32, GatewayError> {
    let raw = take(bytes, 4)?;
    Ok(i32::from_be_bytes(raw.try_into().expect("slice length checked")))
}

/// Maps the reserved atoms onto their scalar variants; everything else stays
/// a proper `Atom`.
fn parse_atom(bytes: &mut &[u8], len: usize) -> Result<EtfValue, GatewayError> {
    let raw = take(bytes, len)?;
    let name = String::from_utf8(raw.to_vec())?;
    Ok(match name.as_str() {
        "true" => EtfValue::Boolean(true),
        "false" => EtfValue::Boolean(false),
        "nil" => EtfValue::Nil,
        _ => EtfValue::Atom(name),
    })
}

fn binary_value(raw: &[u8]) -> EtfValue {
    match std::str::from_utf8(raw) {
        Ok(s) => EtfValue::Str(s.to_string()),
        Err(_) => EtfValue::Binary(Bytes::copy_from_slice(raw)),
    }
}

/// Parses the legacy 31-byte printf-formatted float representation.
fn parse_legacy_float(bytes: &mut &[u8]) -> Result<EtfValue, GatewayError> {
    let raw = take(bytes, 31)?;
    let text = std::str::from_utf8(raw)
        .map_err(|_| GatewayError::Malformed("non-ASCII legacy float".to_string()))?;
    let value = text
        .trim_end_matches('\0')
        .trim()
        .parse::<f64>()
        .map_err(|_| GatewayError::Malformed(format!("unparsable legacy float: {text:?}")))?;
    Ok(EtfValue::Float(value))
}

fn parse_list(bytes: &mut &[u8], depth: usize) -> Result<EtfValue, GatewayError> {
    let count = read_u32(bytes)? as usize;
    check_element_count(count, bytes)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(decode_recursive(bytes, depth + 1)?);
    }
    // Only proper lists appear on this wire: the tail must be the empty list.
    match decode_recursive(bytes, depth + 1)? {
        EtfValue::List(tail) if tail.is_empty() => Ok(EtfValue::List(items)),
        _ => Err(GatewayError::Malformed("improper list tail".to_string())),
    }
}

/// Parses a fixed-arity element sequence (tuples are surfaced as sequences).
fn parse_sequence(bytes: &mut &[u8], arity: usize, depth: usize) -> Result<EtfValue, GatewayError> {
    check_element_count(arity, bytes)?;
    let mut items = Vec::with_capacity(arity);
    for _ in 0..arity {
        items.push(decode_recursive(bytes, depth + 1)?);
    }
    Ok(EtfValue::List(items))
}

fn parse_map(bytes: &mut &[u8], depth: usize) -> Result<EtfValue, GatewayError> {
    let arity = read_u32(bytes)? as usize;
    check_element_count(arity, bytes)?;
    let mut entries = Vec::with_capacity(arity);
    for _ in 0..arity {
        let key = decode_recursive(bytes, depth + 1)?;
        let value = decode_recursive(bytes, depth + 1)?;
        entries.push((key, value));
    }
    Ok(EtfValue::Map(entries))
}

/// Parses an arbitrary-width integer; values outside `i64` are rejected.
fn parse_big_integer(bytes: &mut &[u8], n: usize) -> Result<EtfValue, GatewayError> {
    let sign = read_u8(bytes)?;
    let raw = take(bytes, n)?;

    let mut magnitude: u128 = 0;
    for (index, byte) in raw.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        if index >= 8 {
            return Err(GatewayError::Malformed(
                "integer exceeds 64-bit range".to_string(),
            ));
        }
        magnitude |= (*byte as u128) << (8 * index);
    }

    // Magnitude fits in 64 bits here, so the signed conversion below is exact.
    let value = if sign == 0 {
        i64::try_from(magnitude)
    } else {
        i64::try_from(-(magnitude as i128))
    };
    value
        .map(EtfValue::Integer)
        .map_err(|_| GatewayError::Malformed("integer exceeds 64-bit range".to_string()))
}

/// Rejects element counts that cannot possibly fit in the remaining buffer,
/// before any allocation happens.
fn check_element_count(count: usize, bytes: &[u8]) -> Result<(), GatewayError> {
    if count > MAX_CONTAINER_ELEMENTS {
        return Err(GatewayError::Malformed(
            "container element limit exceeded".to_string(),
        ));
    }
    // Every element occupies at least one tag byte.
    if count > bytes.len() {
        return Err(GatewayError::Truncated);
    }
    Ok(())
}
