// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding for the collaboration protocol: JSON text frames, with
//! deflate-compressed binary frames for payloads over the threshold.

use std::io::{Read, Write};

use axum::extract::ws::Message;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::events::ServerEvent;

/// Payloads above this many bytes go out compressed.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// Encode an event as a wire frame. Returns None only on a serialization
/// bug; callers drop the frame.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    let json = serde_json::to_string(event).ok()?;
    if json.len() > COMPRESS_THRESHOLD {
        let compressed = deflate(json.as_bytes())?;
        Some(Message::Binary(compressed.into()))
    } else {
        Some(Message::Text(json.into()))
    }
}

/// Decode a frame back into `(event_name, data)`. This is the client half of
/// the protocol; the server only uses it in tests.
pub fn decode(msg: &Message) -> Option<(String, Value)> {
    let json = match msg {
        Message::Text(text) => text.to_string(),
        Message::Binary(bytes) => inflate(bytes)?,
        _ => return None,
    };
    let value: Value = serde_json::from_str(&json).ok()?;
    let event = value.get("event")?.as_str()?.to_owned();
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    Some((event, data))
}

fn deflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

fn inflate(data: &[u8]) -> Option<String> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = String::new();
    decoder.read_to_string(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
