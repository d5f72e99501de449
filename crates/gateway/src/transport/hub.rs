// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process session registry and named rooms.
//!
//! Rooms are opaque strings. Broadcasts encode once and deliver with a lossy
//! `try_send` per member; a slow consumer drops frames instead of stalling
//! the sender.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::events::{ServerEvent, UserSnapshot};
use crate::state::epoch_ms;
use crate::transport::wire;

/// Outbound queue depth per session.
const SESSION_QUEUE: usize = 256;

static DROP_COUNT: AtomicU64 = AtomicU64::new(0);

fn sample_every_256(n: u64) -> bool {
    (n & 255) == 1
}

pub type SessionId = String;

/// One connected client. Owned by its socket task; shared read-only with
/// handlers.
pub struct Session {
    pub id: SessionId,
    pub user: UserSnapshot,
    pub ip: String,
    pub user_agent: Option<String>,
    pub connected_at_ms: u64,
    tx: mpsc::Sender<Message>,
}

impl Session {
    /// Queue a frame for this session. Lossy.
    pub fn send(&self, event: &ServerEvent) {
        let Some(frame) = wire::encode(event) else {
            warn!(event = event.name(), "unencodable frame dropped");
            return;
        };
        self.send_frame(frame);
    }

    fn send_frame(&self, frame: Message) {
        if self.tx.try_send(frame).is_err() {
            let n = DROP_COUNT.fetch_add(1, Ordering::Relaxed);
            if sample_every_256(n) {
                warn!(session_id = %self.id, drops = n, "outbound queue full, frame dropped");
            }
        }
    }
}

/// Session + room registry. One per process.
pub struct Hub {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    rooms: RwLock<HashMap<String, HashSet<SessionId>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()), rooms: RwLock::new(HashMap::new()) }
    }

    /// Register a new session and hand back its outbound queue.
    pub async fn connect(
        &self,
        user: UserSnapshot,
        ip: String,
        user_agent: Option<String>,
    ) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let session = Arc::new(Session {
            id: uuid::Uuid::new_v4().to_string(),
            user,
            ip,
            user_agent,
            connected_at_ms: epoch_ms(),
            tx,
        });
        self.sessions.write().await.insert(session.id.clone(), Arc::clone(&session));
        (session, rx)
    }

    /// Remove a session and its room memberships.
    pub async fn disconnect(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(session_id);
            !members.is_empty()
        });
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn join_room(&self, room: &str, session_id: &str) {
        self.rooms
            .write()
            .await
            .entry(room.to_owned())
            .or_default()
            .insert(session_id.to_owned());
    }

    pub async fn leave_room(&self, room: &str, session_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(session_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn room_members(&self, room: &str) -> Vec<SessionId> {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map_or(0, HashSet::len)
    }

    /// Broadcast to every member of a room, optionally excluding one session.
    pub async fn broadcast(&self, room: &str, event: &ServerEvent, except: Option<&str>) {
        let Some(frame) = wire::encode(event) else {
            warn!(event = event.name(), room, "unencodable broadcast dropped");
            return;
        };
        let members = self.room_members(room).await;
        let sessions = self.sessions.read().await;
        for member in members {
            if Some(member.as_str()) == except {
                continue;
            }
            if let Some(session) = sessions.get(&member) {
                session.send_frame(frame.clone());
            }
        }
    }

    /// Unicast to one session, if still connected.
    pub async fn send_to(&self, session_id: &str, event: &ServerEvent) {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            session.send(event);
        }
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
