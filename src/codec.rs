//! Wire codecs: JSON and compact varint encodings of [`WireDiff`]
//!
//! JSON layout (the transport default):
//!
//! ```text
//! {"0": "text", "1": {...nested...}, "static": ["<p>", "</p>"]}
//! {"dynamics": [["a"], ["b"]], "static": ["<li>", "</li>"],
//!  "stream": ["songs", [["songs-1", -1, null, false]], ["songs-0"], true]}
//! ```
//!
//! Slot keys are decimal strings. The stream's trailing `true` is present
//! only when the client must reset the collection.
//!
//! The binary layout carries the same tree with LEB128 varints:
//! `[varint slot_count] ([varint index] [tag] payload)* [flags] ...`
//!
//! Author: Moroya Sakamoto

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::diff::{WireDiff, WireValue};
use crate::stream::{StreamInsert, StreamPatch};

pub const KEY_STATIC: &str = "static";
pub const KEY_DYNAMICS: &str = "dynamics";
pub const KEY_STREAM: &str = "stream";

/// Deepest nesting accepted by the decoders
pub const MAX_DEPTH: usize = 128;

/// Undecodable input
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("input ended mid-value")]
    Truncated,
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("varint does not fit in 64 bits")]
    VarintOverflow,
    #[error("{0} bytes left after the diff")]
    TrailingBytes(usize),
    #[error("diff nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed wire diff: {0}")]
    Malformed(String),
}

fn malformed(what: impl Into<String>) -> CodecError {
    CodecError::Malformed(what.into())
}

// ── JSON: Serialize ────────────────────────────────────────────────────

impl Serialize for WireDiff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.slots.len()
            + usize::from(self.statics.is_some())
            + usize::from(self.dynamics.is_some())
            + usize::from(self.stream.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (index, value) in &self.slots {
            map.serialize_entry(&index.to_string(), value)?;
        }
        if let Some(statics) = &self.statics {
            map.serialize_entry(KEY_STATIC, statics)?;
        }
        if let Some(dynamics) = &self.dynamics {
            map.serialize_entry(KEY_DYNAMICS, dynamics)?;
        }
        if let Some(stream) = &self.stream {
            map.serialize_entry(KEY_STREAM, stream)?;
        }
        map.end()
    }
}

impl Serialize for WireValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WireValue::Text(text) => serializer.serialize_str(text),
            WireValue::Diff(diff) => diff.serialize(serializer),
        }
    }
}

impl Serialize for StreamPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3 + usize::from(self.reset)))?;
        seq.serialize_element(&self.name)?;
        seq.serialize_element(&self.inserts)?;
        seq.serialize_element(&self.deletes)?;
        if self.reset {
            seq.serialize_element(&true)?;
        }
        seq.end()
    }
}

impl Serialize for StreamInsert {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.dom_id)?;
        seq.serialize_element(&self.at)?;
        seq.serialize_element(&self.limit)?;
        seq.serialize_element(&self.update_only)?;
        seq.end()
    }
}

/// Encode a diff as a JSON string.
pub fn encode_json(diff: &WireDiff) -> Result<String, CodecError> {
    Ok(serde_json::to_string(diff)?)
}

/// Encode a diff as a JSON value tree.
pub fn to_json_value(diff: &WireDiff) -> Result<Value, CodecError> {
    Ok(serde_json::to_value(diff)?)
}

// ── JSON: decode ───────────────────────────────────────────────────────

/// Decode a JSON wire diff.
pub fn decode_json(text: &str) -> Result<WireDiff, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    from_json_value(&value)
}

/// Decode a wire diff from a JSON value tree.
pub fn from_json_value(value: &Value) -> Result<WireDiff, CodecError> {
    diff_from_value(value, 0)
}

fn diff_from_value(value: &Value, depth: usize) -> Result<WireDiff, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    let object = value
        .as_object()
        .ok_or_else(|| malformed("diff must be an object"))?;

    let mut diff = WireDiff::default();
    for (key, value) in object {
        match key.as_str() {
            KEY_STATIC => diff.statics = Some(strings_from(value)?),
            KEY_DYNAMICS => {
                let rows = value
                    .as_array()
                    .ok_or_else(|| malformed("dynamics must be an array"))?;
                diff.dynamics = Some(rows.iter().map(strings_from).collect::<Result<_, _>>()?);
            }
            KEY_STREAM => diff.stream = Some(stream_from(value)?),
            slot => {
                let index: usize = slot
                    .parse()
                    .map_err(|_| malformed(format!("unknown key `{slot}`")))?;
                let value = match value {
                    Value::String(text) => WireValue::Text(text.clone()),
                    Value::Object(_) => WireValue::Diff(diff_from_value(value, depth + 1)?),
                    other => return Err(malformed(format!("slot {index} holds {other}"))),
                };
                diff.slots.insert(index, value);
            }
        }
    }
    Ok(diff)
}

fn strings_from(value: &Value) -> Result<Vec<String>, CodecError> {
    value
        .as_array()
        .ok_or_else(|| malformed("expected an array of strings"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| malformed(format!("expected a string, found {v}")))
        })
        .collect()
}

fn stream_from(value: &Value) -> Result<StreamPatch, CodecError> {
    let parts = value
        .as_array()
        .ok_or_else(|| malformed("stream must be an array"))?;
    let (name, inserts, deletes, rest) = match parts.as_slice() {
        [name, inserts, deletes, rest @ ..] => (name, inserts, deletes, rest),
        _ => return Err(malformed("stream needs name, inserts and deletes")),
    };
    let reset = match rest {
        [] => false,
        [Value::Bool(true)] => true,
        _ => return Err(malformed("stream reset marker must be a single `true`")),
    };
    let name = name
        .as_str()
        .ok_or_else(|| malformed("stream name must be a string"))?;
    let inserts = inserts
        .as_array()
        .ok_or_else(|| malformed("stream inserts must be an array"))?
        .iter()
        .map(insert_from)
        .collect::<Result<_, _>>()?;
    Ok(StreamPatch {
        name: String::from(name),
        inserts,
        deletes: strings_from(deletes)?,
        reset,
    })
}

fn insert_from(value: &Value) -> Result<StreamInsert, CodecError> {
    let bad = || malformed(format!("bad stream insert {value}"));
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(dom_id), at, limit, Value::Bool(update_only)]) => {
            let at = at.as_i64().ok_or_else(bad)?;
            let limit = match limit {
                Value::Null => None,
                other => Some(other.as_i64().ok_or_else(bad)?),
            };
            Ok(StreamInsert {
                dom_id: dom_id.clone(),
                at,
                limit,
                update_only: *update_only,
            })
        }
        _ => Err(bad()),
    }
}

// ── Binary: discriminants ──────────────────────────────────────────────

const TAG_TEXT: u8 = 0x00;
const TAG_DIFF: u8 = 0x01;

const HAS_STATIC: u8 = 0x01;
const HAS_DYNAMICS: u8 = 0x02;
const HAS_STREAM: u8 = 0x04;

const INSERT_HAS_LIMIT: u8 = 0x01;
const INSERT_UPDATE_ONLY: u8 = 0x02;

// ── Varint (LEB128) ───────────────────────────────────────────────────

/// Encode a u64 as LEB128 varint.
#[inline]
fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a u64 from LEB128 varint.
#[inline]
fn decode_varint(data: &[u8], pos: &mut usize) -> Result<u64, CodecError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *data.get(*pos).ok_or(CodecError::Truncated)?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(CodecError::VarintOverflow);
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(CodecError::VarintOverflow);
        }
    }
    Ok(value)
}

#[inline]
fn encode_usize(value: usize, buf: &mut Vec<u8>) {
    encode_varint(value as u64, buf);
}

#[inline]
fn decode_usize(data: &[u8], pos: &mut usize) -> Result<usize, CodecError> {
    usize::try_from(decode_varint(data, pos)?).map_err(|_| CodecError::VarintOverflow)
}

/// Zigzag: small negatives stay small (-1 -> 1, 1 -> 2).
#[inline]
fn encode_i64(value: i64, buf: &mut Vec<u8>) {
    encode_varint(((value << 1) ^ (value >> 63)) as u64, buf);
}

#[inline]
fn decode_i64(data: &[u8], pos: &mut usize) -> Result<i64, CodecError> {
    let raw = decode_varint(data, pos)?;
    Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

fn read_u8(data: &[u8], pos: &mut usize) -> Result<u8, CodecError> {
    let byte = *data.get(*pos).ok_or(CodecError::Truncated)?;
    *pos += 1;
    Ok(byte)
}

// ── String Codec ───────────────────────────────────────────────────────

fn encode_string(s: &str, buf: &mut Vec<u8>) {
    encode_usize(s.len(), buf);
    buf.extend_from_slice(s.as_bytes());
}

fn decode_string(data: &[u8], pos: &mut usize) -> Result<String, CodecError> {
    let len = decode_usize(data, pos)?;
    let end = pos.checked_add(len).ok_or(CodecError::Truncated)?;
    let bytes = data.get(*pos..end).ok_or(CodecError::Truncated)?;
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
    *pos = end;
    Ok(s)
}

fn encode_strings(strings: &[String], buf: &mut Vec<u8>) {
    encode_usize(strings.len(), buf);
    for s in strings {
        encode_string(s, buf);
    }
}

fn decode_strings(data: &[u8], pos: &mut usize) -> Result<Vec<String>, CodecError> {
    let count = decode_usize(data, pos)?;
    // Each string needs at least one length byte.
    let mut strings = Vec::with_capacity(count.min(data.len()));
    for _ in 0..count {
        strings.push(decode_string(data, pos)?);
    }
    Ok(strings)
}

// ── Stream Codec ───────────────────────────────────────────────────────

fn encode_stream(patch: &StreamPatch, buf: &mut Vec<u8>) {
    encode_string(&patch.name, buf);
    encode_usize(patch.inserts.len(), buf);
    for insert in &patch.inserts {
        encode_string(&insert.dom_id, buf);
        encode_i64(insert.at, buf);
        let mut flags = 0;
        if insert.limit.is_some() {
            flags |= INSERT_HAS_LIMIT;
        }
        if insert.update_only {
            flags |= INSERT_UPDATE_ONLY;
        }
        buf.push(flags);
        if let Some(limit) = insert.limit {
            encode_i64(limit, buf);
        }
    }
    encode_strings(&patch.deletes, buf);
    buf.push(u8::from(patch.reset));
}

fn decode_stream(data: &[u8], pos: &mut usize) -> Result<StreamPatch, CodecError> {
    let name = decode_string(data, pos)?;
    let count = decode_usize(data, pos)?;
    let mut inserts = Vec::with_capacity(count.min(data.len()));
    for _ in 0..count {
        let dom_id = decode_string(data, pos)?;
        let at = decode_i64(data, pos)?;
        let flags = read_u8(data, pos)?;
        if flags & !(INSERT_HAS_LIMIT | INSERT_UPDATE_ONLY) != 0 {
            return Err(CodecError::UnknownTag(flags));
        }
        let limit = if flags & INSERT_HAS_LIMIT != 0 {
            Some(decode_i64(data, pos)?)
        } else {
            None
        };
        inserts.push(StreamInsert {
            dom_id,
            at,
            limit,
            update_only: flags & INSERT_UPDATE_ONLY != 0,
        });
    }
    let deletes = decode_strings(data, pos)?;
    let reset = match read_u8(data, pos)? {
        0 => false,
        1 => true,
        other => return Err(CodecError::UnknownTag(other)),
    };
    Ok(StreamPatch {
        name,
        inserts,
        deletes,
        reset,
    })
}

// ── WireDiff Codec ─────────────────────────────────────────────────────

fn encode_node(diff: &WireDiff, buf: &mut Vec<u8>) {
    encode_usize(diff.slots.len(), buf);
    for (&index, value) in &diff.slots {
        encode_usize(index, buf);
        match value {
            WireValue::Text(text) => {
                buf.push(TAG_TEXT);
                encode_string(text, buf);
            }
            WireValue::Diff(nested) => {
                buf.push(TAG_DIFF);
                encode_node(nested, buf);
            }
        }
    }

    let mut flags = 0;
    if diff.statics.is_some() {
        flags |= HAS_STATIC;
    }
    if diff.dynamics.is_some() {
        flags |= HAS_DYNAMICS;
    }
    if diff.stream.is_some() {
        flags |= HAS_STREAM;
    }
    buf.push(flags);

    if let Some(statics) = &diff.statics {
        encode_strings(statics, buf);
    }
    if let Some(rows) = &diff.dynamics {
        encode_usize(rows.len(), buf);
        for row in rows {
            encode_strings(row, buf);
        }
    }
    if let Some(stream) = &diff.stream {
        encode_stream(stream, buf);
    }
}

fn decode_node(data: &[u8], pos: &mut usize, depth: usize) -> Result<WireDiff, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    let mut diff = WireDiff::default();

    let count = decode_usize(data, pos)?;
    for _ in 0..count {
        let index = decode_usize(data, pos)?;
        let value = match read_u8(data, pos)? {
            TAG_TEXT => WireValue::Text(decode_string(data, pos)?),
            TAG_DIFF => WireValue::Diff(decode_node(data, pos, depth + 1)?),
            other => return Err(CodecError::UnknownTag(other)),
        };
        diff.slots.insert(index, value);
    }

    let flags = read_u8(data, pos)?;
    if flags & !(HAS_STATIC | HAS_DYNAMICS | HAS_STREAM) != 0 {
        return Err(CodecError::UnknownTag(flags));
    }
    if flags & HAS_STATIC != 0 {
        diff.statics = Some(decode_strings(data, pos)?);
    }
    if flags & HAS_DYNAMICS != 0 {
        let rows = decode_usize(data, pos)?;
        let mut dynamics = Vec::with_capacity(rows.min(data.len()));
        for _ in 0..rows {
            dynamics.push(decode_strings(data, pos)?);
        }
        diff.dynamics = Some(dynamics);
    }
    if flags & HAS_STREAM != 0 {
        diff.stream = Some(decode_stream(data, pos)?);
    }
    Ok(diff)
}

/// Encode a diff into the compact binary layout.
pub fn encode_diff(diff: &WireDiff) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_node(diff, &mut buf);
    buf
}

/// Decode a diff from the compact binary layout. The whole buffer must
/// be consumed.
pub fn decode_diff(data: &[u8]) -> Result<WireDiff, CodecError> {
    let mut pos = 0;
    let diff = decode_node(data, &mut pos, 0)?;
    if pos != data.len() {
        return Err(CodecError::TrailingBytes(data.len() - pos));
    }
    Ok(diff)
}

/// Encoded size in bytes of the binary layout.
pub fn encoded_size(diff: &WireDiff) -> usize {
    encode_diff(diff).len()
}

// ── Tests ──────────────────────────────────────────────────────────────
