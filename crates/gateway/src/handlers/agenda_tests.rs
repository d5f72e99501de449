// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::collections::HashMap;

use crate::config::test_config;
use crate::events::{TaskEvent, UserSnapshot};
use crate::store::memory::MemoryStore;
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session};
use crate::transport::wire;
use super::{AgendaHandler, TaskAction};

fn user(email: &str) -> UserSnapshot {
    UserSnapshot {
        id: format!("id-{email}"),
        email: email.to_owned(),
        name: email.to_owned(),
        image: None,
    }
}

fn agenda(hub: &Arc<Hub>) -> AgendaHandler {
    let store = SharedStore::new(&test_config(), CancellationToken::new());
    AgendaHandler::new(Arc::clone(hub), store)
}

/// A session that is a member of the ws1 workspace room but not the agenda.
async fn workspace_member(hub: &Hub, email: &str) -> (Arc<Session>, mpsc::Receiver<Message>) {
    let (session, rx) = hub.connect(user(email), "127.0.0.1".into(), None).await;
    hub.join_room("ws1", &session.id).await;
    (session, rx)
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

fn task(id: &str) -> TaskEvent {
    TaskEvent { workspace_id: "ws1".into(), payload: json!({"taskId": id, "title": "Do it"}) }
}

#[tokio::test]
async fn join_updates_agenda_room_and_notifies_workspace() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let agenda = agenda(&hub);
    let (a, mut rx_a) = workspace_member(&hub, "alice@x").await;
    let (_b, mut rx_b) = workspace_member(&hub, "bob@x").await;

    agenda.join(&a, "ws1", user("alice@x")).await?;

    let a_events = drain(&mut rx_a);
    assert!(a_events.iter().any(|(name, data)| {
        name == "agenda_users_updated" && data.as_array().map(Vec::len) == Some(1)
    }));
    let b_events = drain(&mut rx_b);
    assert!(
        b_events
            .iter()
            .any(|(name, data)| name == "agenda_user_joined" && data["user"]["email"] == "alice@x"),
        "workspace room hears about agenda joins: {b_events:?}"
    );
    Ok(())
}

#[tokio::test]
async fn leave_notifies_both_rooms() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let agenda = agenda(&hub);
    let (a, _rx_a) = workspace_member(&hub, "alice@x").await;
    let (_b, mut rx_b) = workspace_member(&hub, "bob@x").await;
    agenda.join(&a, "ws1", user("alice@x")).await?;
    let _ = drain(&mut rx_b);

    agenda.leave(&a, "ws1").await?;

    let events = drain(&mut rx_b);
    assert!(events
        .iter()
        .any(|(name, data)| name == "agenda_user_left" && data["email"] == "alice@x"));
    assert!(agenda.snapshot("ws1").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn task_events_fan_out_to_agenda_and_workspace_twins() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let agenda = agenda(&hub);
    let (a, mut rx_a) = workspace_member(&hub, "alice@x").await;
    let (b, mut rx_b) = workspace_member(&hub, "bob@x").await;
    let (_c, mut rx_c) = workspace_member(&hub, "carol@x").await;
    agenda.join(&a, "ws1", user("alice@x")).await?;
    agenda.join(&b, "ws1", user("bob@x")).await?;
    for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
        let _ = drain(rx);
    }

    agenda.task_event(&a, TaskAction::Moved, task("t9")).await?;

    // Bob is on the agenda: agenda-scoped event plus the workspace twin.
    let b_events = drain(&mut rx_b);
    let (_, data) = b_events
        .iter()
        .find(|(name, _)| name == "task_moved")
        .ok_or_else(|| anyhow::anyhow!("bob missed task_moved: {b_events:?}"))?;
    assert_eq!(data["taskId"], "t9");
    assert_eq!(data["workspaceId"], "ws1");
    assert!(data["timestamp"].as_u64().is_some(), "server timestamp stamped in");
    assert!(b_events.iter().any(|(name, _)| name == "workspace_task_moved"));

    // Carol is off-agenda: only the workspace twin.
    let c_events = drain(&mut rx_c);
    assert!(!c_events.iter().any(|(name, _)| name == "task_moved"));
    assert!(c_events.iter().any(|(name, _)| name == "workspace_task_moved"));

    // The sender receives neither copy.
    let a_events = drain(&mut rx_a);
    assert!(!a_events.iter().any(|(name, _)| name.contains("task_moved")));
    Ok(())
}

#[tokio::test]
async fn duplicate_email_collapses_in_agenda_roster() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let agenda = agenda(&hub);
    let (a1, _rx1) = workspace_member(&hub, "alice@x").await;
    let (a2, _rx2) = workspace_member(&hub, "alice@x").await;

    agenda.join(&a1, "ws1", user("alice@x")).await?;
    agenda.join(&a2, "ws1", user("alice@x")).await?;

    assert_eq!(agenda.snapshot("ws1").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn get_users_unicasts_roster() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let agenda = agenda(&hub);
    let (a, _rx_a) = workspace_member(&hub, "alice@x").await;
    let (b, mut rx_b) = workspace_member(&hub, "bob@x").await;
    agenda.join(&a, "ws1", user("alice@x")).await?;
    let _ = drain(&mut rx_b);

    agenda.get_users(&b, "ws1").await?;
    let events = drain(&mut rx_b);
    assert!(events.iter().any(|(name, data)| {
        name == "agenda_users_updated" && data.as_array().map(Vec::len) == Some(1)
    }));
    Ok(())
}

#[tokio::test]
async fn shared_agenda_record_converges_across_instances() -> anyhow::Result<()> {
    let backing = Arc::new(MemoryStore::default());
    let hub_a = Arc::new(Hub::new());
    let hub_b = Arc::new(Hub::new());
    let instance_a = AgendaHandler::new(
        Arc::clone(&hub_a),
        SharedStore::in_memory(&test_config(), Arc::clone(&backing)),
    );
    let instance_b = AgendaHandler::new(
        Arc::clone(&hub_b),
        SharedStore::in_memory(&test_config(), Arc::clone(&backing)),
    );
    let (a, _rx_a) = hub_a.connect(user("alice@x"), "127.0.0.1".into(), None).await;
    let (b, _rx_b) = hub_b.connect(user("bob@x"), "127.0.0.1".into(), None).await;

    instance_a.join(&a, "ws1", user("alice@x")).await?;
    instance_b.join(&b, "ws1", user("bob@x")).await?;

    let record: HashMap<String, UserSnapshot> = backing
        .get("task:ws1:agenda_users")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    assert_eq!(record.len(), 2, "union of both instances: {record:?}");
    assert!(record.contains_key(&a.id));
    assert!(record.contains_key(&b.id));

    instance_a.leave(&a, "ws1").await?;
    let record: HashMap<String, UserSnapshot> = backing
        .get("task:ws1:agenda_users")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    assert_eq!(record.len(), 1);
    assert!(record.contains_key(&b.id), "bob survives alice's instance writing");

    instance_b.leave(&b, "ws1").await?;
    assert!(backing.get("task:ws1:agenda_users").is_none());
    Ok(())
}

#[tokio::test]
async fn disconnect_leaves_agenda_immediately() -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let agenda = agenda(&hub);
    let (a, _rx_a) = workspace_member(&hub, "alice@x").await;
    let (_b, mut rx_b) = workspace_member(&hub, "bob@x").await;
    agenda.join(&a, "ws1", user("alice@x")).await?;
    let _ = drain(&mut rx_b);

    agenda.handle_disconnect(&a).await;
    assert!(agenda.snapshot("ws1").await.is_empty());
    let events = drain(&mut rx_b);
    assert!(events.iter().any(|(name, _)| name == "agenda_user_left"));
    Ok(())
}
