// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::events::{ServerEvent, UserLeft, UserSnapshot};
use crate::transport::wire;
use super::Hub;

fn user(email: &str) -> UserSnapshot {
    UserSnapshot { id: email.to_owned(), email: email.to_owned(), name: email.to_owned(), image: None }
}

async fn connect(hub: &Hub, email: &str) -> (std::sync::Arc<super::Session>, mpsc::Receiver<Message>) {
    hub.connect(user(email), "127.0.0.1".into(), None).await
}

fn recv_event(rx: &mut mpsc::Receiver<Message>) -> Option<(String, serde_json::Value)> {
    match rx.try_recv() {
        Ok(frame) => wire::decode(&frame),
        Err(_) => None,
    }
}

#[tokio::test]
async fn broadcast_reaches_room_members_only() -> anyhow::Result<()> {
    let hub = Hub::new();
    let (a, mut rx_a) = connect(&hub, "alice@x").await;
    let (b, mut rx_b) = connect(&hub, "bob@x").await;
    let (_c, mut rx_c) = connect(&hub, "carol@x").await;

    hub.join_room("ws1", &a.id).await;
    hub.join_room("ws1", &b.id).await;

    hub.broadcast("ws1", &ServerEvent::UsersConnected(vec![user("alice@x")]), None).await;

    assert!(recv_event(&mut rx_a).is_some());
    assert!(recv_event(&mut rx_b).is_some());
    assert!(recv_event(&mut rx_c).is_none(), "carol is not in the room");
    Ok(())
}

#[tokio::test]
async fn broadcast_except_skips_sender() -> anyhow::Result<()> {
    let hub = Hub::new();
    let (a, mut rx_a) = connect(&hub, "alice@x").await;
    let (b, mut rx_b) = connect(&hub, "bob@x").await;
    hub.join_room("ws1", &a.id).await;
    hub.join_room("ws1", &b.id).await;

    let event = ServerEvent::UserLeft(UserLeft { email: "alice@x".into(), name: String::new() });
    hub.broadcast("ws1", &event, Some(&a.id)).await;

    assert!(recv_event(&mut rx_a).is_none());
    let (name, data) = recv_event(&mut rx_b).ok_or_else(|| anyhow::anyhow!("bob got nothing"))?;
    assert_eq!(name, "user_left");
    assert_eq!(data["email"], "alice@x");
    Ok(())
}

#[tokio::test]
async fn disconnect_removes_session_from_rooms() {
    let hub = Hub::new();
    let (a, _rx_a) = connect(&hub, "alice@x").await;
    let (b, _rx_b) = connect(&hub, "bob@x").await;
    hub.join_room("ws1", &a.id).await;
    hub.join_room("ws1", &b.id).await;
    assert_eq!(hub.room_size("ws1").await, 2);

    hub.disconnect(&a.id).await;
    assert_eq!(hub.room_size("ws1").await, 1);
    assert!(hub.session(&a.id).await.is_none());
    assert_eq!(hub.session_count().await, 1);
}

#[tokio::test]
async fn empty_rooms_are_reclaimed() {
    let hub = Hub::new();
    let (a, _rx) = connect(&hub, "alice@x").await;
    hub.join_room("ws1", &a.id).await;
    hub.leave_room("ws1", &a.id).await;
    assert_eq!(hub.room_size("ws1").await, 0);
    assert!(hub.room_members("ws1").await.is_empty());
}

#[tokio::test]
async fn unicast_targets_one_session() {
    let hub = Hub::new();
    let (a, mut rx_a) = connect(&hub, "alice@x").await;
    let (_b, mut rx_b) = connect(&hub, "bob@x").await;

    hub.send_to(&a.id, &ServerEvent::UsersConnected(vec![])).await;
    assert!(recv_event(&mut rx_a).is_some());
    assert!(recv_event(&mut rx_b).is_none());
}

#[tokio::test]
async fn full_queue_drops_instead_of_blocking() {
    let hub = Hub::new();
    let (a, _rx) = connect(&hub, "alice@x").await;
    // Never drain; overflow must not deadlock.
    for _ in 0..600 {
        a.send(&ServerEvent::UsersConnected(vec![]));
    }
}
