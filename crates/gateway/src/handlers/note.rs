// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Note collaboration: ordered member lists, read-through content with
//! last-writer-wins updates, and server-authoritative cursor echo.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::GatewayError;
use crate::events::{
    CursorUpdated, NoteContentLoaded, NoteContentUpdated, NoteMember, NoteUsersUpdated,
    ServerEvent, UserSnapshot,
};
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session};

/// Shared-store lifetime of note content.
const CONTENT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

type NoteKey = (String, String);

pub struct NoteHandler {
    hub: Arc<Hub>,
    store: SharedStore,
    members: RwLock<HashMap<NoteKey, Vec<NoteMember>>>,
    contents: RwLock<HashMap<NoteKey, String>>,
}

impl NoteHandler {
    pub fn new(hub: Arc<Hub>, store: SharedStore) -> Self {
        Self {
            hub,
            store,
            members: RwLock::new(HashMap::new()),
            contents: RwLock::new(HashMap::new()),
        }
    }

    fn room_name(workspace_id: &str, note_id: &str) -> String {
        format!("note:{workspace_id}:{note_id}")
    }

    fn users_key(workspace_id: &str, note_id: &str) -> String {
        format!("note:{workspace_id}:{note_id}:users")
    }

    fn content_key(workspace_id: &str, note_id: &str) -> String {
        format!("note:{workspace_id}:{note_id}:content")
    }

    pub async fn join(
        &self,
        session: &Session,
        workspace_id: &str,
        note_id: &str,
        user: UserSnapshot,
    ) -> Result<(), GatewayError> {
        if workspace_id.is_empty() || note_id.is_empty() {
            return Err(GatewayError::Validation("workspaceId and noteId required".into()));
        }
        let key = (workspace_id.to_owned(), note_id.to_owned());
        {
            let mut members = self.members.write().await;
            let list = members.entry(key.clone()).or_default();
            // Same account re-joining (new tab, reconnect) replaces its slot
            // in place instead of appending.
            match list.iter_mut().find(|m| m.user.id == user.id) {
                Some(existing) => {
                    existing.session_id = session.id.clone();
                    existing.user = user;
                }
                None => list.push(NoteMember { session_id: session.id.clone(), user }),
            }
        }
        let merged = self.mirror_members(workspace_id, note_id, &[]).await;

        let content = self.load_content(workspace_id, note_id).await;
        self.hub.join_room(&Self::room_name(workspace_id, note_id), &session.id).await;
        self.hub
            .send_to(
                &session.id,
                &ServerEvent::NoteContentLoaded(NoteContentLoaded {
                    note_id: note_id.to_owned(),
                    content,
                }),
            )
            .await;
        let users = match merged {
            Some(list) => list,
            None => self.snapshot(workspace_id, note_id).await,
        };
        self.broadcast_members(workspace_id, note_id, users).await;
        Ok(())
    }

    pub async fn leave(
        &self,
        session: &Session,
        workspace_id: &str,
        note_id: &str,
    ) -> Result<(), GatewayError> {
        let key = (workspace_id.to_owned(), note_id.to_owned());
        let removed = {
            let mut members = self.members.write().await;
            let Some(list) = members.get_mut(&key) else { return Ok(()) };
            let removed_user = list
                .iter()
                .find(|m| m.session_id == session.id)
                .map(|m| m.user.clone());
            list.retain(|m| m.session_id != session.id);
            if list.is_empty() {
                members.remove(&key);
                // The shared copy keeps serving re-joins until its TTL runs out.
                self.contents.write().await.remove(&key);
            }
            removed_user
        };
        let Some(user) = removed else { return Ok(()) };

        let merged = self.mirror_members(workspace_id, note_id, &[session.id.clone()]).await;
        let room = Self::room_name(workspace_id, note_id);
        self.hub.leave_room(&room, &session.id).await;
        let users = match merged {
            Some(list) => list,
            None => self.snapshot(workspace_id, note_id).await,
        };
        self.broadcast_members(workspace_id, note_id, users).await;
        // Withdraw the leaver's cursor for everyone still in the note.
        self.hub
            .broadcast(
                &room,
                &ServerEvent::CursorUpdated(CursorUpdated {
                    note_id: note_id.to_owned(),
                    user_id: session.id.clone(),
                    user_data: user,
                    cursor: Value::Null,
                }),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn get_users(
        &self,
        session: &Session,
        workspace_id: &str,
        note_id: &str,
    ) -> Result<(), GatewayError> {
        let users = self.snapshot(workspace_id, note_id).await;
        self.hub
            .send_to(
                &session.id,
                &ServerEvent::NoteUsersUpdated(NoteUsersUpdated {
                    note_id: note_id.to_owned(),
                    users,
                }),
            )
            .await;
        Ok(())
    }

    /// Cursor updates echo to the entire room, sender included, so every
    /// client renders the same authoritative state.
    pub async fn cursor_update(
        &self,
        session: &Session,
        workspace_id: &str,
        note_id: &str,
        cursor: Value,
    ) -> Result<(), GatewayError> {
        let key = (workspace_id.to_owned(), note_id.to_owned());
        let user = {
            let members = self.members.read().await;
            members
                .get(&key)
                .and_then(|list| list.iter().find(|m| m.session_id == session.id))
                .map(|m| m.user.clone())
        };
        // Updates from sessions not in the note are dropped silently.
        let Some(user) = user else { return Ok(()) };

        self.hub
            .broadcast(
                &Self::room_name(workspace_id, note_id),
                &ServerEvent::CursorUpdated(CursorUpdated {
                    note_id: note_id.to_owned(),
                    user_id: session.id.clone(),
                    user_data: user,
                    cursor,
                }),
                None,
            )
            .await;
        Ok(())
    }

    /// Last-writer-wins content overwrite; no merge.
    pub async fn content_update(
        &self,
        session: &Session,
        workspace_id: &str,
        note_id: &str,
        content: String,
    ) -> Result<(), GatewayError> {
        let key = (workspace_id.to_owned(), note_id.to_owned());
        let has_members = self.members.read().await.get(&key).is_some_and(|l| !l.is_empty());
        if !has_members {
            return Ok(());
        }

        self.contents.write().await.insert(key, content.clone());
        if let Err(e) = self
            .store
            .set(
                &Self::content_key(workspace_id, note_id),
                &Value::String(content.clone()),
                Some(CONTENT_TTL),
            )
            .await
        {
            debug!(workspace_id, note_id, err = %e, "note content write dropped");
        }

        self.hub
            .broadcast(
                &Self::room_name(workspace_id, note_id),
                &ServerEvent::NoteContentUpdated(NoteContentUpdated {
                    note_id: note_id.to_owned(),
                    content,
                    updated_by: session.id.clone(),
                }),
                Some(&session.id),
            )
            .await;
        Ok(())
    }

    /// Notes have no grace window; disconnect leaves every note at once.
    pub async fn handle_disconnect(&self, session: &Session) {
        let keys: Vec<NoteKey> = {
            let members = self.members.read().await;
            members
                .iter()
                .filter(|(_, list)| list.iter().any(|m| m.session_id == session.id))
                .map(|(key, _)| key.clone())
                .collect()
        };
        for (workspace_id, note_id) in keys {
            let _ = self.leave(session, &workspace_id, &note_id).await;
        }
    }

    async fn load_content(&self, workspace_id: &str, note_id: &str) -> String {
        let key = (workspace_id.to_owned(), note_id.to_owned());
        if let Some(content) = self.contents.read().await.get(&key) {
            return content.clone();
        }
        match self.store.get(&Self::content_key(workspace_id, note_id), false).await {
            Ok(Some(Value::String(content))) => {
                self.contents.write().await.insert(key, content.clone());
                content
            }
            Ok(_) => String::new(),
            Err(e) => {
                debug!(workspace_id, note_id, err = %e, "note content read unavailable");
                String::new()
            }
        }
    }

    /// Read-merge-write the shared member list: drop the given sessions,
    /// update or append this instance's members by user id, and write the
    /// union back (delete when empty). Members who joined via other
    /// instances keep their slots and their order. The read bypasses the
    /// cache so the merge starts from authoritative state.
    async fn mirror_members(
        &self,
        workspace_id: &str,
        note_id: &str,
        drop_sessions: &[String],
    ) -> Option<Vec<NoteMember>> {
        let key = Self::users_key(workspace_id, note_id);
        let mut merged: Vec<NoteMember> = match self.store.get(&key, true).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!(workspace_id, note_id, err = %e, "note members read unavailable");
                return None;
            }
        };
        merged.retain(|m| !drop_sessions.iter().any(|drop| drop == &m.session_id));
        for member in self.snapshot(workspace_id, note_id).await {
            let user_id = member.user.id.clone();
            match merged.iter_mut().find(|m| m.user.id == user_id) {
                Some(slot) => *slot = member,
                None => merged.push(member),
            }
        }
        let result = if merged.is_empty() {
            self.store.delete(&key).await
        } else {
            self.store.set(&key, &json!(merged), None).await
        };
        if let Err(e) = result {
            debug!(workspace_id, note_id, err = %e, "note members write dropped");
        }
        Some(merged)
    }

    async fn broadcast_members(&self, workspace_id: &str, note_id: &str, users: Vec<NoteMember>) {
        self.hub
            .broadcast(
                &Self::room_name(workspace_id, note_id),
                &ServerEvent::NoteUsersUpdated(NoteUsersUpdated {
                    note_id: note_id.to_owned(),
                    users,
                }),
                None,
            )
            .await;
    }

    pub async fn snapshot(&self, workspace_id: &str, note_id: &str) -> Vec<NoteMember> {
        self.members
            .read()
            .await
            .get(&(workspace_id.to_owned(), note_id.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) async fn cached_content(&self, workspace_id: &str, note_id: &str) -> Option<String> {
        self.contents
            .read()
            .await
            .get(&(workspace_id.to_owned(), note_id.to_owned()))
            .cloned()
    }
}

#[cfg(test)]
#[path = "note_tests.rs"]
mod tests;
