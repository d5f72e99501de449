// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace presence: join/leave/get-users, duplicate collapsing by email,
//! and the reconnect grace window after transport disconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::events::{ServerEvent, UserLeft, UserSnapshot};
use crate::metrics::Metrics;
use crate::state::epoch_ms;
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session, SessionId};

#[derive(Debug, Clone)]
pub(crate) struct PresenceEntry {
    pub user: UserSnapshot,
    pub seq: u64,
}

struct PendingDisconnect {
    email: String,
    cancel: CancellationToken,
}

pub struct WorkspacePresence {
    hub: Arc<Hub>,
    store: SharedStore,
    metrics: Arc<Metrics>,
    grace: Duration,
    seq: AtomicU64,
    rooms: RwLock<HashMap<String, HashMap<SessionId, PresenceEntry>>>,
    last_seen: RwLock<HashMap<String, HashMap<String, u64>>>,
    pending: Mutex<HashMap<(SessionId, String), PendingDisconnect>>,
}

impl WorkspacePresence {
    pub fn new(hub: Arc<Hub>, store: SharedStore, metrics: Arc<Metrics>, grace: Duration) -> Self {
        Self {
            hub,
            store,
            metrics,
            grace,
            seq: AtomicU64::new(0),
            rooms: RwLock::new(HashMap::new()),
            last_seen: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn store_key(workspace_id: &str) -> String {
        format!("workspace:{workspace_id}:users")
    }

    fn pending_lock(&self) -> MutexGuard<'_, HashMap<(SessionId, String), PendingDisconnect>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel grace timers for `email` in `workspace`. Returns true when at
    /// least one timer was cancelled, i.e. this join is a reconnection.
    fn cancel_pending_for_email(&self, workspace_id: &str, email: &str) -> bool {
        let mut pending = self.pending_lock();
        let keys: Vec<(SessionId, String)> = pending
            .iter()
            .filter(|((_, ws), p)| ws == workspace_id && p.email == email)
            .map(|(k, _)| k.clone())
            .collect();
        let reconnected = !keys.is_empty();
        for key in keys {
            if let Some(p) = pending.remove(&key) {
                p.cancel.cancel();
            }
        }
        reconnected
    }

    fn cancel_pending_for_session(&self, session_id: &str, workspace_id: &str) {
        let mut pending = self.pending_lock();
        if let Some(p) = pending.remove(&(session_id.to_owned(), workspace_id.to_owned())) {
            p.cancel.cancel();
        }
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

        let reconnected = self.cancel_pending_for_email(workspace_id, &user.email);

        // Local view: collapse other sessions carrying the same email.
        let had_prior = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(workspace_id.to_owned()).or_default();
            let evicted: Vec<SessionId> = room
                .iter()
                .filter(|(sid, e)| e.user.email == user.email && sid.as_str() != session.id)
                .map(|(sid, _)| sid.clone())
                .collect();
            let had_prior = !evicted.is_empty();
            for sid in evicted {
                room.remove(&sid);
            }
            room.insert(
                session.id.clone(),
                PresenceEntry { user: user.clone(), seq: self.next_seq() },
            );
            had_prior
        };

        // Shared record: evict same-email sessions registered by any
        // instance, then merge this instance's entries back in.
        let merged = self.write_back_shared(workspace_id, &[], &[user.email.clone()]).await;
        self.touch_last_seen(workspace_id, &user.email).await;
        self.hub.join_room(workspace_id, &session.id).await;

        let users = match merged {
            Some(shared) => dedup_shared(shared),
            None => self.snapshot(workspace_id).await,
        };
        self.hub.broadcast(workspace_id, &ServerEvent::UsersConnected(users), None).await;
        if !reconnected && !had_prior {
            self.hub
                .broadcast(workspace_id, &ServerEvent::UserJoined(user.clone()), Some(&session.id))
                .await;
        }

        self.metrics.user_joined_workspace();
        self.refresh_workspace_gauge().await;
        debug!(workspace_id, email = %user.email, reconnected, "workspace join");
        Ok(())
    }

    pub async fn leave(&self, session: &Session, workspace_id: &str) -> Result<(), GatewayError> {
        self.cancel_pending_for_session(&session.id, workspace_id);
        self.remove_and_announce(workspace_id, &session.id).await;
        self.hub.leave_room(workspace_id, &session.id).await;
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
        self.hub.send_to(&session.id, &ServerEvent::UsersConnected(users)).await;
        Ok(())
    }

    /// Transport disconnect: arm a grace timer per workspace this session is
    /// present in. A matching re-join cancels it; expiry finalizes the leave.
    pub async fn handle_disconnect(self: &Arc<Self>, session: &Session) {
        let memberships: Vec<(String, UserSnapshot)> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .filter_map(|(ws, room)| {
                    room.get(&session.id).map(|e| (ws.clone(), e.user.clone()))
                })
                .collect()
        };

        for (workspace_id, user) in memberships {
            let cancel = CancellationToken::new();
            self.pending_lock().insert(
                (session.id.clone(), workspace_id.clone()),
                PendingDisconnect { email: user.email.clone(), cancel: cancel.clone() },
            );

            let this = Arc::clone(self);
            let session_id = session.id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(this.grace) => {}
                }
                let still_pending = this
                    .pending_lock()
                    .remove(&(session_id.clone(), workspace_id.clone()))
                    .is_some();
                if still_pending {
                    info!(workspace_id, email = %user.email, "grace expired, finalizing leave");
                    this.remove_and_announce(&workspace_id, &session_id).await;
                }
            });
        }
    }

    /// Remove a session's presence entry and broadcast `user_left` plus the
    /// refreshed roster.
    async fn remove_and_announce(&self, workspace_id: &str, session_id: &str) {
        let removed = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(workspace_id) else { return };
            let removed = room.remove(session_id);
            if room.is_empty() {
                rooms.remove(workspace_id);
            }
            removed
        };
        let Some(entry) = removed else { return };

        let merged = self.write_back_shared(workspace_id, &[session_id.to_owned()], &[]).await;
        self.touch_last_seen(workspace_id, &entry.user.email).await;

        self.hub
            .broadcast(
                workspace_id,
                &ServerEvent::UserLeft(UserLeft {
                    email: entry.user.email.clone(),
                    name: entry.user.name.clone(),
                }),
                Some(session_id),
            )
            .await;
        let users = match merged {
            Some(shared) => dedup_shared(shared),
            None => self.snapshot(workspace_id).await,
        };
        self.hub.broadcast(workspace_id, &ServerEvent::UsersConnected(users), Some(session_id)).await;
        self.refresh_workspace_gauge().await;
    }

    // -- Duplicate sweeper ------------------------------------------------------

    pub fn spawn_duplicate_sweeper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = timer.tick() => {}
                }
                this.sweep_duplicates_once().await;
            }
        });
    }

    /// Collapse duplicate emails in every workspace, keeping the most recent
    /// entry, and reconcile the shared record.
    pub(crate) async fn sweep_duplicates_once(&self) {
        let mut touched: Vec<(String, Vec<SessionId>)> = Vec::new();
        {
            let mut rooms = self.rooms.write().await;
            for (ws, room) in rooms.iter_mut() {
                let mut newest: HashMap<String, (SessionId, u64)> = HashMap::new();
                for (sid, entry) in room.iter() {
                    let candidate = (sid.clone(), entry.seq);
                    newest
                        .entry(entry.user.email.clone())
                        .and_modify(|kept| {
                            if candidate.1 > kept.1 {
                                *kept = candidate.clone();
                            }
                        })
                        .or_insert(candidate);
                }
                let keep: HashMap<&SessionId, ()> =
                    newest.values().map(|(sid, _)| (sid, ())).collect();
                let evicted: Vec<SessionId> = room
                    .keys()
                    .filter(|sid| !keep.contains_key(sid))
                    .cloned()
                    .collect();
                if !evicted.is_empty() {
                    room.retain(|sid, _| keep.contains_key(sid));
                    touched.push((ws.clone(), evicted));
                }
            }
        }
        for (ws, evicted) in touched {
            debug!(workspace_id = %ws, evicted = evicted.len(), "duplicate sweep evicted sessions");
            let merged = self.write_back_shared(&ws, &evicted, &[]).await;
            let users = match merged {
                Some(shared) => dedup_shared(shared),
                None => self.snapshot(&ws).await,
            };
            self.hub.broadcast(&ws, &ServerEvent::UsersConnected(users), None).await;
        }
        self.refresh_workspace_gauge().await;
    }

    // -- Shared record ---------------------------------------------------------

    /// Read the shared record. The write path bypasses the local cache so
    /// the merge starts from authoritative state, not a stale read.
    async fn load_shared(
        &self,
        workspace_id: &str,
        bypass_cache: bool,
    ) -> Option<HashMap<String, UserSnapshot>> {
        match self.store.get(&Self::store_key(workspace_id), bypass_cache).await {
            Ok(Some(value)) => Some(serde_json::from_value(value).unwrap_or_default()),
            Ok(None) => Some(HashMap::new()),
            Err(e) => {
                debug!(workspace_id, err = %e, "shared presence read unavailable");
                None
            }
        }
    }

    /// Read-merge-write the shared record: drop the given sessions and any
    /// entry carrying one of the given emails, overlay this instance's own
    /// entries, and write the union back (delete when empty). Sessions
    /// registered by other instances survive. Returns the merged record, or
    /// None when the store is unavailable.
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
                .map(|room| {
                    room.iter().map(|(sid, e)| (sid.clone(), e.user.clone())).collect()
                })
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
            debug!(workspace_id, err = %e, "shared presence write dropped");
        }
        Some(merged)
    }

    async fn touch_last_seen(&self, workspace_id: &str, email: &str) {
        self.last_seen
            .write()
            .await
            .entry(workspace_id.to_owned())
            .or_default()
            .insert(email.to_owned(), epoch_ms());
    }

    // -- Views ------------------------------------------------------------------

    /// Deduplicated-by-email roster from the local view, last writer wins.
    pub async fn snapshot(&self, workspace_id: &str) -> Vec<UserSnapshot> {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(workspace_id) else { return Vec::new() };
        dedup_entries(room.values())
    }

    pub async fn workspace_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn refresh_workspace_gauge(&self) {
        self.metrics.set_active_workspaces(self.workspace_count().await as u64);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, workspace_id: &str, session_id: &str, user: UserSnapshot) {
        let seq = self.next_seq();
        self.rooms
            .write()
            .await
            .entry(workspace_id.to_owned())
            .or_default()
            .insert(session_id.to_owned(), PresenceEntry { user, seq });
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending_lock().len()
    }
}

/// Collapse entries sharing an email; the entry inserted last wins. Output
/// is ordered by insertion.
pub(crate) fn dedup_entries<'a>(
    entries: impl Iterator<Item = &'a PresenceEntry>,
) -> Vec<UserSnapshot> {
    let mut newest: HashMap<String, (u64, UserSnapshot)> = HashMap::new();
    for entry in entries {
        newest
            .entry(entry.user.email.clone())
            .and_modify(|kept| {
                if entry.seq > kept.0 {
                    *kept = (entry.seq, entry.user.clone());
                }
            })
            .or_insert((entry.seq, entry.user.clone()));
    }
    let mut users: Vec<(u64, UserSnapshot)> = newest.into_values().collect();
    users.sort_by_key(|(seq, _)| *seq);
    users.into_iter().map(|(_, user)| user).collect()
}

/// Dedup a shared record, which carries no insertion order; sorted by email
/// for a stable roster.
pub(crate) fn dedup_shared(shared: HashMap<String, UserSnapshot>) -> Vec<UserSnapshot> {
    let mut by_email: HashMap<String, UserSnapshot> = HashMap::new();
    for user in shared.into_values() {
        by_email.insert(user.email.clone(), user);
    }
    let mut users: Vec<UserSnapshot> = by_email.into_values().collect();
    users.sort_by(|a, b| a.email.cmp(&b.email));
    users
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
