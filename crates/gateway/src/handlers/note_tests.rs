// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::test_config;
use crate::events::{NoteMember, UserSnapshot};
use crate::store::memory::MemoryStore;
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session};
use crate::transport::wire;
use super::NoteHandler;

fn user(email: &str) -> UserSnapshot {
    UserSnapshot {
        id: format!("id-{email}"),
        email: email.to_owned(),
        name: email.to_owned(),
        image: None,
    }
}

fn notes(hub: &Arc<Hub>) -> NoteHandler {
    let store = SharedStore::new(&test_config(), CancellationToken::new());
    NoteHandler::new(Arc::clone(hub), store)
}

async fn connect(hub: &Hub, email: &str) -> (Arc<Session>, mpsc::Receiver<Message>) {
    hub.connect(user(email), "127.0.0.1".into(), None).await
}

fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Some(decoded) = wire::decode(&frame) {
            events.push(decoded);
        }
    }
    events
}

#[tokio::test]
async fn join_loads_content_and_broadcasts_members() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, mut rx_a) = connect(&hub, "alice@x").await;

    notes.join(&a, "ws1", "n1", user("alice@x")).await?;

    let events = drain(&mut rx_a);
    let (_, loaded) = events
        .iter()
        .find(|(name, _)| name == "note_content_loaded")
        .ok_or_else(|| anyhow::anyhow!("no content loaded: {events:?}"))?;
    assert_eq!(loaded["noteId"], "n1");
    assert_eq!(loaded["content"], "", "store is down and nothing local");
    assert!(events.iter().any(|(name, data)| {
        name == "note_users_updated" && data["users"].as_array().map(Vec::len) == Some(1)
    }));
    Ok(())
}

#[tokio::test]
async fn rejoin_same_user_replaces_slot_in_order() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, _rx_a) = connect(&hub, "alice@x").await;
    let (b, _rx_b) = connect(&hub, "bob@x").await;

    notes.join(&a, "ws1", "n1", user("alice@x")).await?;
    notes.join(&b, "ws1", "n1", user("bob@x")).await?;

    // Alice re-joins from a new session; her slot stays first.
    let (a2, _rx_a2) = connect(&hub, "alice@x").await;
    notes.join(&a2, "ws1", "n1", user("alice@x")).await?;

    let members = notes.snapshot("ws1", "n1").await;
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].user.email, "alice@x");
    assert_eq!(members[0].session_id, a2.id, "replaced in place with the new session");
    assert_eq!(members[1].user.email, "bob@x");
    Ok(())
}

#[tokio::test]
async fn content_update_excludes_sender_and_caches_locally() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, mut rx_a) = connect(&hub, "alice@x").await;
    let (c, mut rx_c) = connect(&hub, "carol@x").await;
    notes.join(&a, "ws1", "n1", user("alice@x")).await?;
    notes.join(&c, "ws1", "n1", user("carol@x")).await?;
    let _ = drain(&mut rx_a);
    let _ = drain(&mut rx_c);

    notes.content_update(&a, "ws1", "n1", "hello".into()).await?;

    let c_events = drain(&mut rx_c);
    let (_, data) = c_events
        .iter()
        .find(|(name, _)| name == "note_content_updated")
        .ok_or_else(|| anyhow::anyhow!("carol missed the update"))?;
    assert_eq!(data["content"], "hello");
    assert_eq!(data["updatedBy"], a.id.as_str());
    assert!(
        !drain(&mut rx_a).iter().any(|(name, _)| name == "note_content_updated"),
        "sender is excluded"
    );

    // A fresh join sees the updated content even with the store down.
    let (d, mut rx_d) = connect(&hub, "dave@x").await;
    notes.join(&d, "ws1", "n1", user("dave@x")).await?;
    let d_events = drain(&mut rx_d);
    assert!(d_events
        .iter()
        .any(|(name, data)| name == "note_content_loaded" && data["content"] == "hello"));
    Ok(())
}

#[tokio::test]
async fn content_update_without_members_is_dropped() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, _rx_a) = connect(&hub, "alice@x").await;

    notes.content_update(&a, "ws1", "nowhere", "x".into()).await?;
    assert!(notes.cached_content("ws1", "nowhere").await.is_none());
    Ok(())
}

#[tokio::test]
async fn cursor_echoes_to_everyone_including_sender() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, mut rx_a) = connect(&hub, "alice@x").await;
    let (c, mut rx_c) = connect(&hub, "carol@x").await;
    notes.join(&a, "ws1", "n1", user("alice@x")).await?;
    notes.join(&c, "ws1", "n1", user("carol@x")).await?;
    let _ = drain(&mut rx_a);
    let _ = drain(&mut rx_c);

    notes.cursor_update(&a, "ws1", "n1", json!({"line": 3, "ch": 7})).await?;

    for (rx, who) in [(&mut rx_a, "sender"), (&mut rx_c, "peer")] {
        let events = drain(rx);
        let (_, data) = events
            .iter()
            .find(|(name, _)| name == "cursor_updated")
            .ok_or_else(|| anyhow::anyhow!("{who} missed the echo"))?;
        assert_eq!(data["userId"], a.id.as_str());
        assert_eq!(data["cursor"]["line"], 3);
    }
    Ok(())
}

#[tokio::test]
async fn cursor_from_non_member_is_dropped() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, mut rx_a) = connect(&hub, "alice@x").await;
    let (outsider, _rx_o) = connect(&hub, "eve@x").await;
    notes.join(&a, "ws1", "n1", user("alice@x")).await?;
    let _ = drain(&mut rx_a);

    notes.cursor_update(&outsider, "ws1", "n1", json!(1)).await?;
    assert!(
        !drain(&mut rx_a).iter().any(|(name, _)| name == "cursor_updated"),
        "non-member cursors must not reach the room"
    );
    Ok(())
}

#[tokio::test]
async fn leave_withdraws_cursor_and_updates_members() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, _rx_a) = connect(&hub, "alice@x").await;
    let (c, mut rx_c) = connect(&hub, "carol@x").await;
    notes.join(&a, "ws1", "n1", user("alice@x")).await?;
    notes.join(&c, "ws1", "n1", user("carol@x")).await?;
    let _ = drain(&mut rx_c);

    notes.leave(&a, "ws1", "n1").await?;

    let events = drain(&mut rx_c);
    assert!(events.iter().any(|(name, data)| {
        name == "note_users_updated" && data["users"].as_array().map(Vec::len) == Some(1)
    }));
    assert!(
        events.iter().any(|(name, data)| {
            name == "cursor_updated" && data["cursor"].is_null() && data["userId"] == a.id.as_str()
        }),
        "withdrawal broadcast: {events:?}"
    );
    Ok(())
}

#[tokio::test]
async fn shared_member_list_converges_across_instances() -> anyhow::Result<()> {
    let backing = Arc::new(MemoryStore::default());
    let hub_a = Arc::new(Hub::new());
    let hub_b = Arc::new(Hub::new());
    let instance_a = NoteHandler::new(
        Arc::clone(&hub_a),
        SharedStore::in_memory(&test_config(), Arc::clone(&backing)),
    );
    let instance_b = NoteHandler::new(
        Arc::clone(&hub_b),
        SharedStore::in_memory(&test_config(), Arc::clone(&backing)),
    );
    let (a, _rx_a) = hub_a.connect(user("alice@x"), "127.0.0.1".into(), None).await;
    let (b, _rx_b) = hub_b.connect(user("bob@x"), "127.0.0.1".into(), None).await;

    instance_a.join(&a, "ws1", "n1", user("alice@x")).await?;
    instance_b.join(&b, "ws1", "n1", user("bob@x")).await?;

    let list: Vec<NoteMember> = backing
        .get("note:ws1:n1:users")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    assert_eq!(list.len(), 2, "union of both instances: {list:?}");
    assert_eq!(list[0].user.email, "alice@x", "join order preserved across instances");
    assert_eq!(list[1].user.email, "bob@x");

    instance_a.leave(&a, "ws1", "n1").await?;
    let list: Vec<NoteMember> = backing
        .get("note:ws1:n1:users")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].session_id, b.id, "bob survives alice's instance writing");

    instance_b.leave(&b, "ws1", "n1").await?;
    assert!(backing.get("note:ws1:n1:users").is_none());
    Ok(())
}

#[tokio::test]
async fn disconnect_leaves_all_notes_immediately() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let notes = notes(&hub);
    let (a, _rx_a) = connect(&hub, "alice@x").await;
    let (c, mut rx_c) = connect(&hub, "carol@x").await;
    notes.join(&a, "ws1", "n1", user("alice@x")).await?;
    notes.join(&a, "ws1", "n2", user("alice@x")).await?;
    notes.join(&c, "ws1", "n1", user("carol@x")).await?;
    let _ = drain(&mut rx_c);

    notes.handle_disconnect(&a).await;

    assert_eq!(notes.snapshot("ws1", "n1").await.len(), 1);
    assert!(notes.snapshot("ws1", "n2").await.is_empty());
    let events = drain(&mut rx_c);
    assert!(events.iter().any(|(name, _)| name == "note_users_updated"));
    Ok(())
}
