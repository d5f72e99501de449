// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::extract::ws::Message;

use crate::events::{ChatMessage, ServerEvent, WireMessage};
use super::{decode, encode, COMPRESS_THRESHOLD};

fn message_with_content(content: String) -> ServerEvent {
    let msg = ChatMessage {
        id: "1-1".into(),
        workspace_id: "ws1".into(),
        sender_email: "alice@x".into(),
        sender_name: "Alice".into(),
        sender_image: None,
        content,
        timestamp: 1,
    };
    ServerEvent::NewMessage(WireMessage::from(&msg))
}

#[test]
fn small_payloads_stay_text() -> anyhow::Result<()> {
    let event = message_with_content("hi".into());
    let frame = encode(&event).ok_or_else(|| anyhow::anyhow!("encode failed"))?;
    assert!(matches!(frame, Message::Text(_)));

    let (name, data) = decode(&frame).ok_or_else(|| anyhow::anyhow!("decode failed"))?;
    assert_eq!(name, "new_message");
    assert_eq!(data["c"], "hi");
    Ok(())
}

#[test]
fn large_payloads_are_compressed_binary() -> anyhow::Result<()> {
    let content = "x".repeat(COMPRESS_THRESHOLD * 4);
    let event = message_with_content(content.clone());
    let frame = encode(&event).ok_or_else(|| anyhow::anyhow!("encode failed"))?;
    match &frame {
        Message::Binary(bytes) => {
            assert!(bytes.len() < content.len(), "deflate should shrink the payload");
        }
        other => anyhow::bail!("expected Binary, got {other:?}"),
    }

    let (name, data) = decode(&frame).ok_or_else(|| anyhow::anyhow!("decode failed"))?;
    assert_eq!(name, "new_message");
    assert_eq!(data["c"].as_str().map(str::len), Some(content.len()));
    Ok(())
}

#[test]
fn decode_rejects_non_frame_messages() {
    assert!(decode(&Message::Ping(Vec::new().into())).is_none());
    assert!(decode(&Message::Text("not json".into())).is_none());
}
