/*
 * escape.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * 7-bit escaping and JSON encoding for values leaving the gateway.
 */

//! Wire encoding.
//!
//! Values crossing the process boundary are made 7-bit safe before being
//! serialized: every string inside the value is percent-escaped with the
//! classic `escape()` convention (`%XX` for code units below 0x100,
//! `%uXXXX` above), then the whole value is written as JSON text.
//!
//! Object keys are left as they are; only values are escaped.

use serde_json::{Map, Value};

use crate::error::Result;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(unit: u16) -> bool {
    u8::try_from(unit).is_ok_and(|b| b.is_ascii_alphanumeric() || b"@*_+-./".contains(&b))
}

/// Escape a string so that it only contains 7-bit characters.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for unit in input.encode_utf16() {
        if is_unreserved(unit) {
            out.push(unit as u8 as char);
        } else if unit < 0x100 {
            out.push('%');
            out.push(HEX[(unit >> 4) as usize] as char);
            out.push(HEX[(unit & 0xF) as usize] as char);
        } else {
            out.push_str("%u");
            for shift in [12, 8, 4, 0] {
                out.push(HEX[((unit >> shift) & 0xF) as usize] as char);
            }
        }
    }
    out
}

fn hex_value(unit: u16) -> Option<u16> {
    match unit {
        0x30..=0x39 => Some(unit - 0x30),
        0x41..=0x46 => Some(unit - 0x41 + 10),
        0x61..=0x66 => Some(unit - 0x61 + 10),
        _ => None,
    }
}

fn parse_hex(units: &[u16]) -> Option<u16> {
    units
        .iter()
        .try_fold(0u16, |acc, &u| hex_value(u).map(|v| (acc << 4) | v))
}

/// Reverse [`escape`]. Malformed `%` sequences are kept literally.
pub fn unescape(input: &str) -> String {
    const PERCENT: u16 = b'%' as u16;
    const LOWER_U: u16 = b'u' as u16;

    let units: Vec<u16> = input.encode_utf16().collect();
    let mut out = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        if units[i] == PERCENT {
            if units.get(i + 1) == Some(&LOWER_U)
                && let Some(unit) = units.get(i + 2..i + 6).and_then(parse_hex)
            {
                out.push(unit);
                i += 6;
                continue;
            }
            if let Some(unit) = units.get(i + 1..i + 3).and_then(parse_hex) {
                out.push(unit);
                i += 3;
                continue;
            }
        }
        out.push(units[i]);
        i += 1;
    }
    String::from_utf16_lossy(&out)
}

/// Escape every string inside a JSON value.
pub fn escape_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape(s)),
        Value::Array(items) => Value::Array(items.iter().map(escape_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), escape_value(v)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// Reverse [`escape_value`].
pub fn unescape_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(unescape(s)),
        Value::Array(items) => Value::Array(items.iter().map(unescape_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), unescape_value(v)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// Escape and serialize a value for the wire.
pub fn encode(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&escape_value(value))?)
}

/// Parse and unescape a wire value.
pub fn decode(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text)?;
    Ok(unescape_value(&value))
}
