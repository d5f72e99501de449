// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agenda presence and task fan-out. Task events are not persisted; they are
//! enriched with a server timestamp and mirrored to the parent workspace
//! room under `workspace_task_*` names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::GatewayError;
use crate::events::{AgendaUserJoined, AgendaUserLeft, ServerEvent, TaskEvent, UserSnapshot};
use crate::state::epoch_ms;
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session, SessionId};
use super::workspace::{dedup_entries, dedup_shared, PresenceEntry};

/// Which task fan-out a client requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Created,
    Updated,
    Deleted,
    Moved,
}

pub struct AgendaHandler {
    hub: Arc<Hub>,
    store: SharedStore,
    seq: AtomicU64,
    rooms: RwLock<HashMap<String, HashMap<SessionId, PresenceEntry>>>,
}

impl AgendaHandler {
    pub fn new(hub: Arc<Hub>, store: SharedStore) -> Self {
        Self { hub, store, seq: AtomicU64::new(0), rooms: RwLock::new(HashMap::new()) }
    }

    fn room_name(workspace_id: &str) -> String {
        format!("agenda:{workspace_id}")
    }

    fn store_key(workspace_id: &str) -> String {
        format!("task:{workspace_id}:agenda_users")
    }

    pub async fn join(
        &self,
        session: &Session,
        workspace_id: &str,
        user: UserSnapshot,
    ) -> Result<(), GatewayError> {
        if workspace_id.is_empty() || user.email.is_empty() {
            return Err(GatewayError::Validation("workspaceId and user.email required".into()));
        }
        {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(workspace_id.to_owned()).or_default();
            room.retain(|sid, e| !(e.user.email == user.email && sid.as_str() != session.id));
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            room.insert(session.id.clone(), PresenceEntry { user: user.clone(), seq });
        }
        // Shared record: evict same-email sessions from any instance, then
        // merge this instance's entries back in.
        let merged = self.write_back_shared(workspace_id, &[], &[user.email.clone()]).await;
        self.hub.join_room(&Self::room_name(workspace_id), &session.id).await;

        let users = match merged {
            Some(shared) => dedup_shared(shared),
            None => self.snapshot(workspace_id).await,
        };
        self.broadcast_roster(workspace_id, users).await;
        // The parent workspace is told as well, so non-agenda views update.
        self.hub
            .broadcast(workspace_id, &ServerEvent::AgendaUserJoined(AgendaUserJoined { user }), None)
            .await;
        Ok(())
    }

    pub async fn leave(&self, session: &Session, workspace_id: &str) -> Result<(), GatewayError> {
        let removed = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(workspace_id) else { return Ok(()) };
            let removed = room.remove(&session.id);
            if room.is_empty() {
                rooms.remove(workspace_id);
            }
            removed
        };
        let Some(entry) = removed else { return Ok(()) };

        let merged = self.write_back_shared(workspace_id, &[session.id.clone()], &[]).await;
        self.hub.leave_room(&Self::room_name(workspace_id), &session.id).await;
        let users = match merged {
            Some(shared) => dedup_shared(shared),
            None => self.snapshot(workspace_id).await,
        };
        self.broadcast_roster(workspace_id, users).await;
        self.hub
            .broadcast(
                workspace_id,
                &ServerEvent::AgendaUserLeft(AgendaUserLeft { email: entry.user.email }),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn get_users(
        &self,
        session: &Session,
        workspace_id: &str,
    ) -> Result<(), GatewayError> {
        let users = match self.load_shared(workspace_id, false).await {
            Some(shared) if !shared.is_empty() => dedup_shared(shared),
            _ => self.snapshot(workspace_id).await,
        };
        self.hub.send_to(&session.id, &ServerEvent::AgendaUsersUpdated(users)).await;
        Ok(())
    }

    /// Pass-through fan-out: agenda room (minus sender) plus the workspace
    /// twin, with a server timestamp stamped in.
    pub async fn task_event(
        &self,
        session: &Session,
        action: TaskAction,
        event: TaskEvent,
    ) -> Result<(), GatewayError> {
        if event.workspace_id.is_empty() {
            return Err(GatewayError::Validation("workspaceId required".into()));
        }
        let enriched = enrich(&event);
        let (agenda_event, workspace_event) = match action {
            TaskAction::Created => (
                ServerEvent::TaskCreated(enriched.clone()),
                ServerEvent::WorkspaceTaskCreated(enriched),
            ),
            TaskAction::Updated => (
                ServerEvent::TaskUpdated(enriched.clone()),
                ServerEvent::WorkspaceTaskUpdated(enriched),
            ),
            TaskAction::Deleted => (
                ServerEvent::TaskDeleted(enriched.clone()),
                ServerEvent::WorkspaceTaskDeleted(enriched),
            ),
            TaskAction::Moved => (
                ServerEvent::TaskMoved(enriched.clone()),
                ServerEvent::WorkspaceTaskMoved(enriched),
            ),
        };
        let workspace_id = event.workspace_id.as_str();
        self.hub
            .broadcast(&Self::room_name(workspace_id), &agenda_event, Some(&session.id))
            .await;
        self.hub.broadcast(workspace_id, &workspace_event, Some(&session.id)).await;
        Ok(())
    }

    /// No grace window for agendas; membership drops with the transport.
    pub async fn handle_disconnect(&self, session: &Session) {
        let workspaces: Vec<String> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .filter(|(_, room)| room.contains_key(&session.id))
                .map(|(ws, _)| ws.clone())
                .collect()
        };
        for workspace_id in workspaces {
            let _ = self.leave(session, &workspace_id).await;
        }
    }

    /// Read the shared record; the write path bypasses the cache so the
    /// merge starts from authoritative state.
    async fn load_shared(
        &self,
        workspace_id: &str,
        bypass_cache: bool,
    ) -> Option<HashMap<String, UserSnapshot>> {
        match self.store.get(&Self::store_key(workspace_id), bypass_cache).await {
            Ok(Some(value)) => Some(serde_json::from_value(value).unwrap_or_default()),
            Ok(None) => Some(HashMap::new()),
            Err(e) => {
                debug!(workspace_id, err = %e, "shared agenda read unavailable");
                None
            }
        }
    }

    /// Read-merge-write the shared record: drop the given sessions and
    /// emails, overlay this instance's entries, write the union back (delete
    /// when empty). Entries from other instances survive.
    async fn write_back_shared(
        &self,
        workspace_id: &str,
        drop_sessions: &[SessionId],
        drop_emails: &[String],
    ) -> Option<HashMap<String, UserSnapshot>> {
        let mut merged = self.load_shared(workspace_id, true).await?;
        merged.retain(|sid, user| {
            !drop_sessions.iter().any(|drop| drop == sid)
                && !drop_emails.iter().any(|drop| drop == &user.email)
        });
        let local: HashMap<String, UserSnapshot> = {
            let rooms = self.rooms.read().await;
            rooms
                .get(workspace_id)
                .map(|room| room.iter().map(|(sid, e)| (sid.clone(), e.user.clone())).collect())
                .unwrap_or_default()
        };
        merged.extend(local);
        let key = Self::store_key(workspace_id);
        let result = if merged.is_empty() {
            self.store.delete(&key).await
        } else {
            self.store.set(&key, &json!(merged), None).await
        };
        if let Err(e) = result {
            debug!(workspace_id, err = %e, "shared agenda write dropped");
        }
        Some(merged)
    }

    async fn broadcast_roster(&self, workspace_id: &str, users: Vec<UserSnapshot>) {
        self.hub
            .broadcast(
                &Self::room_name(workspace_id),
                &ServerEvent::AgendaUsersUpdated(users),
                None,
            )
            .await;
    }

    pub async fn snapshot(&self, workspace_id: &str) -> Vec<UserSnapshot> {
        let rooms = self.rooms.read().await;
        rooms
            .get(workspace_id)
            .map(|room| dedup_entries(room.values()))
            .unwrap_or_default()
    }
}

/// Rebuild the client payload with the workspace id and a server timestamp.
fn enrich(event: &TaskEvent) -> Value {
    let mut obj = match &event.payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    obj.insert("workspaceId".to_owned(), Value::String(event.workspace_id.clone()));
    obj.insert("timestamp".to_owned(), Value::from(epoch_ms()));
    Value::Object(obj)
}

#[cfg(test)]
#[path = "agenda_tests.rs"]
mod tests;
