// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collection presence. Same shape as workspace presence but keyed by
//! `(workspace, collection)`; roster changes are announced to the whole
//! workspace room so sidebars stay current, and disconnects drop membership
//! immediately (no grace window).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::GatewayError;
use crate::events::{CollectionUserJoined, CollectionUserLeft, CollectionUsers, ServerEvent, UserSnapshot};
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session, SessionId};
use super::workspace::{dedup_entries, dedup_shared, PresenceEntry};

pub struct CollectionPresence {
    hub: Arc<Hub>,
    store: SharedStore,
    seq: AtomicU64,
    rooms: RwLock<HashMap<(String, String), HashMap<SessionId, PresenceEntry>>>,
}

impl CollectionPresence {
    pub fn new(hub: Arc<Hub>, store: SharedStore) -> Self {
        Self { hub, store, seq: AtomicU64::new(0), rooms: RwLock::new(HashMap::new()) }
    }

    fn store_key(workspace_id: &str, collection_id: &str) -> String {
        format!("collection:{workspace_id}:{collection_id}:users")
    }

    fn room_name(workspace_id: &str, collection_id: &str) -> String {
        format!("{workspace_id}:{collection_id}")
    }

    pub async fn join(
        &self,
        session: &Session,
        workspace_id: &str,
        collection_id: &str,
        user: UserSnapshot,
    ) -> Result<(), GatewayError> {
        if workspace_id.is_empty() || collection_id.is_empty() || user.email.is_empty() {
            return Err(GatewayError::Validation(
                "workspaceId, collectionId and user.email required".into(),
            ));
        }

        let scope = (workspace_id.to_owned(), collection_id.to_owned());
        {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(scope).or_default();
            room.retain(|sid, e| !(e.user.email == user.email && sid.as_str() != session.id));
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            room.insert(session.id.clone(), PresenceEntry { user: user.clone(), seq });
        }

        // Shared record: evict same-email sessions from any instance, then
        // merge this instance's entries back in.
        let merged = self
            .write_back_shared(workspace_id, collection_id, &[], &[user.email.clone()])
            .await;
        self.hub.join_room(&Self::room_name(workspace_id, collection_id), &session.id).await;

        // Whole-workspace announcements so every member's sidebar updates.
        self.hub
            .broadcast(
                workspace_id,
                &ServerEvent::CollectionUserJoined(CollectionUserJoined {
                    collection_id: collection_id.to_owned(),
                    user,
                }),
                None,
            )
            .await;
        let users = match merged {
            Some(shared) => dedup_shared(shared),
            None => self.snapshot(workspace_id, collection_id).await,
        };
        self.broadcast_roster(workspace_id, collection_id, users).await;
        Ok(())
    }

    pub async fn leave(
        &self,
        session: &Session,
        workspace_id: &str,
        collection_id: &str,
    ) -> Result<(), GatewayError> {
        let Some(entry) = self.remove_local(workspace_id, collection_id, &session.id).await else {
            return Ok(());
        };
        let merged = self
            .write_back_shared(workspace_id, collection_id, &[session.id.clone()], &[])
            .await;
        self.hub.leave_room(&Self::room_name(workspace_id, collection_id), &session.id).await;
        self.hub
            .broadcast(
                workspace_id,
                &ServerEvent::CollectionUserLeft(CollectionUserLeft {
                    collection_id: collection_id.to_owned(),
                    email: entry.user.email,
                }),
                None,
            )
            .await;
        let users = match merged {
            Some(shared) => dedup_shared(shared),
            None => self.snapshot(workspace_id, collection_id).await,
        };
        self.broadcast_roster(workspace_id, collection_id, users).await;
        Ok(())
    }

    /// One `collection_users_updated` per non-empty collection of the
    /// workspace, unicast to the caller. Prefers the shared store view.
    pub async fn get_collections_users(
        &self,
        session: &Session,
        workspace_id: &str,
    ) -> Result<(), GatewayError> {
        let pattern = format!("collection:{workspace_id}:*:users");
        match self.store.keys(&pattern).await {
            Ok(keys) => {
                for key in keys {
                    let Some(collection_id) = parse_collection_id(&key, workspace_id) else {
                        continue;
                    };
                    let users = match self.store.get(&key, false).await {
                        Ok(Some(value)) => shared_roster(value),
                        _ => self.snapshot(workspace_id, &collection_id).await,
                    };
                    if users.is_empty() {
                        continue;
                    }
                    self.hub
                        .send_to(
                            &session.id,
                            &ServerEvent::CollectionUsersUpdated(CollectionUsers {
                                collection_id,
                                users,
                            }),
                        )
                        .await;
                }
            }
            Err(e) => {
                debug!(workspace_id, err = %e, "collection key scan unavailable, local view");
                let scopes: Vec<String> = {
                    let rooms = self.rooms.read().await;
                    rooms
                        .keys()
                        .filter(|(ws, _)| ws == workspace_id)
                        .map(|(_, coll)| coll.clone())
                        .collect()
                };
                for collection_id in scopes {
                    let users = self.snapshot(workspace_id, &collection_id).await;
                    if users.is_empty() {
                        continue;
                    }
                    self.hub
                        .send_to(
                            &session.id,
                            &ServerEvent::CollectionUsersUpdated(CollectionUsers {
                                collection_id,
                                users,
                            }),
                        )
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Collection membership drops immediately on transport disconnect.
    pub async fn handle_disconnect(&self, session: &Session) {
        let scopes: Vec<(String, String)> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .filter(|(_, room)| room.contains_key(&session.id))
                .map(|(scope, _)| scope.clone())
                .collect()
        };
        for (workspace_id, collection_id) in scopes {
            let _ = self.leave(session, &workspace_id, &collection_id).await;
        }
    }

    async fn remove_local(
        &self,
        workspace_id: &str,
        collection_id: &str,
        session_id: &str,
    ) -> Option<PresenceEntry> {
        let scope = (workspace_id.to_owned(), collection_id.to_owned());
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(&scope)?;
        let removed = room.remove(session_id);
        if room.is_empty() {
            rooms.remove(&scope);
        }
        removed
    }

    /// Read the shared record; the write path bypasses the cache so the
    /// merge starts from authoritative state.
    async fn load_shared(
        &self,
        workspace_id: &str,
        collection_id: &str,
        bypass_cache: bool,
    ) -> Option<HashMap<String, UserSnapshot>> {
        match self.store.get(&Self::store_key(workspace_id, collection_id), bypass_cache).await {
            Ok(Some(value)) => Some(serde_json::from_value(value).unwrap_or_default()),
            Ok(None) => Some(HashMap::new()),
            Err(e) => {
                debug!(workspace_id, collection_id, err = %e, "shared collection read unavailable");
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
        collection_id: &str,
        drop_sessions: &[SessionId],
        drop_emails: &[String],
    ) -> Option<HashMap<String, UserSnapshot>> {
        let mut merged = self.load_shared(workspace_id, collection_id, true).await?;
        merged.retain(|sid, user| {
            !drop_sessions.iter().any(|drop| drop == sid)
                && !drop_emails.iter().any(|drop| drop == &user.email)
        });
        let local: HashMap<String, UserSnapshot> = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&(workspace_id.to_owned(), collection_id.to_owned()))
                .map(|room| room.iter().map(|(sid, e)| (sid.clone(), e.user.clone())).collect())
                .unwrap_or_default()
        };
        merged.extend(local);
        let key = Self::store_key(workspace_id, collection_id);
        let result = if merged.is_empty() {
            self.store.delete(&key).await
        } else {
            self.store.set(&key, &json!(merged), None).await
        };
        if let Err(e) = result {
            debug!(workspace_id, collection_id, err = %e, "shared collection write dropped");
        }
        Some(merged)
    }

    async fn broadcast_roster(
        &self,
        workspace_id: &str,
        collection_id: &str,
        users: Vec<UserSnapshot>,
    ) {
        self.hub
            .broadcast(
                workspace_id,
                &ServerEvent::CollectionUsersUpdated(CollectionUsers {
                    collection_id: collection_id.to_owned(),
                    users,
                }),
                None,
            )
            .await;
    }

    pub async fn snapshot(&self, workspace_id: &str, collection_id: &str) -> Vec<UserSnapshot> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&(workspace_id.to_owned(), collection_id.to_owned()))
            .map(|room| dedup_entries(room.values()))
            .unwrap_or_default()
    }
}

/// `collection:{ws}:{id}:users` -> `{id}`.
fn parse_collection_id(key: &str, workspace_id: &str) -> Option<String> {
    key.strip_prefix(&format!("collection:{workspace_id}:"))
        .and_then(|rest| rest.strip_suffix(":users"))
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

fn shared_roster(value: serde_json::Value) -> Vec<UserSnapshot> {
    match serde_json::from_value::<HashMap<String, UserSnapshot>>(value) {
        Ok(map) => dedup_shared(map),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
#[path = "collection_tests.rs"]
mod tests;
