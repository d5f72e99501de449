// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat: bounded per-workspace history, typing indicators with a sweeper,
//! and compressed-key message broadcasts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::GatewayError;
use crate::events::{
    ChatHistory, ChatMessage, IncomingMessage, ServerEvent, StopTypingBroadcast, TypingBroadcast,
    TypingPayload, WireMessage,
};
use crate::state::epoch_ms;
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session};

/// Shared-store TTL for the typing map.
const TYPING_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct TypingEntry {
    name: String,
    updated_at_ms: u64,
}

pub struct ChatHandler {
    hub: Arc<Hub>,
    store: SharedStore,
    limit: usize,
    typing_timeout: Duration,
    counter: AtomicU64,
    history: RwLock<HashMap<String, VecDeque<ChatMessage>>>,
    typing: RwLock<HashMap<String, HashMap<String, TypingEntry>>>,
}

impl ChatHandler {
    pub fn new(
        hub: Arc<Hub>,
        store: SharedStore,
        limit: usize,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            hub,
            store,
            limit: limit.max(1),
            typing_timeout,
            counter: AtomicU64::new(0),
            history: RwLock::new(HashMap::new()),
            typing: RwLock::new(HashMap::new()),
        }
    }

    fn history_key(workspace_id: &str) -> String {
        format!("chat:{workspace_id}:messages")
    }

    fn typing_key(workspace_id: &str) -> String {
        format!("chat:{workspace_id}:typing")
    }

    pub async fn new_message(
        &self,
        session: &Session,
        incoming: IncomingMessage,
    ) -> Result<(), GatewayError> {
        if incoming.workspace_id.is_empty()
            || incoming.sender_email.is_empty()
            || incoming.content.is_empty()
        {
            return Err(GatewayError::Validation(
                "workspaceId, senderEmail and content required".into(),
            ));
        }

        let message = ChatMessage {
            id: self.next_id(),
            workspace_id: incoming.workspace_id.clone(),
            sender_email: incoming.sender_email.clone(),
            sender_name: incoming.sender_name,
            sender_image: incoming.sender_image,
            content: incoming.content,
            timestamp: epoch_ms(),
        };

        {
            let mut history = self.history.write().await;
            let deque = history.entry(message.workspace_id.clone()).or_default();
            if deque.len() == self.limit {
                deque.pop_front();
            }
            deque.push_back(message.clone());
        }

        if let Err(e) = self
            .store
            .list_push_trim(&Self::history_key(&message.workspace_id), &json!(message), self.limit)
            .await
        {
            debug!(workspace_id = %message.workspace_id, err = %e, "history write dropped");
        }

        // Sending a message implicitly ends the sender's typing state.
        self.clear_typing(session, &message.workspace_id, &message.sender_email, None).await;

        self.hub
            .broadcast(
                &message.workspace_id,
                &ServerEvent::NewMessage(WireMessage::from(&message)),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn user_typing(
        &self,
        session: &Session,
        payload: TypingPayload,
    ) -> Result<(), GatewayError> {
        if payload.workspace_id.is_empty() || payload.email.is_empty() {
            return Err(GatewayError::Validation("workspaceId and email required".into()));
        }
        {
            let mut typing = self.typing.write().await;
            typing.entry(payload.workspace_id.clone()).or_default().insert(
                payload.email.clone(),
                TypingEntry { name: payload.name.clone(), updated_at_ms: epoch_ms() },
            );
        }
        self.mirror_typing(&payload.workspace_id, &[]).await;
        self.hub
            .broadcast(
                &payload.workspace_id,
                &ServerEvent::UserTyping(TypingBroadcast {
                    email: payload.email,
                    name: payload.name,
                }),
                Some(&session.id),
            )
            .await;
        Ok(())
    }

    pub async fn user_stop_typing(
        &self,
        session: &Session,
        workspace_id: &str,
        email: &str,
    ) -> Result<(), GatewayError> {
        self.clear_typing(session, workspace_id, email, Some(&session.id)).await;
        Ok(())
    }

    /// Remove a typing entry and broadcast the stop if one existed.
    async fn clear_typing(
        &self,
        _session: &Session,
        workspace_id: &str,
        email: &str,
        except: Option<&str>,
    ) {
        let existed = {
            let mut typing = self.typing.write().await;
            let Some(entries) = typing.get_mut(workspace_id) else { return };
            let existed = entries.remove(email).is_some();
            if entries.is_empty() {
                typing.remove(workspace_id);
            }
            existed
        };
        if !existed {
            return;
        }
        self.mirror_typing(workspace_id, &[email.to_owned()]).await;
        self.hub
            .broadcast(
                workspace_id,
                &ServerEvent::UserStopTyping(StopTypingBroadcast { email: email.to_owned() }),
                except,
            )
            .await;
    }

    /// Read-merge-write the shared typing map: drop the given emails,
    /// overlay this instance's entries, write the union back under the
    /// typing TTL. Typers on other instances survive the write; the read
    /// bypasses the cache so the merge starts from authoritative state.
    async fn mirror_typing(&self, workspace_id: &str, drop_emails: &[String]) {
        let key = Self::typing_key(workspace_id);
        let mut merged: HashMap<String, serde_json::Value> =
            match self.store.get(&key, true).await {
                Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
                Ok(None) => HashMap::new(),
                Err(e) => {
                    debug!(workspace_id, err = %e, "typing mirror dropped");
                    return;
                }
            };
        merged.retain(|email, _| !drop_emails.iter().any(|drop| drop == email));
        {
            let typing = self.typing.read().await;
            if let Some(entries) = typing.get(workspace_id) {
                for (email, entry) in entries {
                    merged.insert(
                        email.clone(),
                        json!({"name": entry.name, "ts": entry.updated_at_ms}),
                    );
                }
            }
        }
        let result = if merged.is_empty() {
            self.store.delete(&key).await
        } else {
            self.store.set(&key, &json!(merged), Some(TYPING_TTL)).await
        };
        if let Err(e) = result {
            debug!(workspace_id, err = %e, "typing mirror dropped");
        }
    }

    /// History delivery: shared list first, local deque as fallback.
    pub async fn history(&self, session: &Session, workspace_id: &str) -> Result<(), GatewayError> {
        let shared: Vec<ChatMessage> = match self
            .store
            .list_range(&Self::history_key(workspace_id), -(self.limit as i64), -1)
            .await
        {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            Err(e) => {
                debug!(workspace_id, err = %e, "history read unavailable");
                Vec::new()
            }
        };
        let messages: Vec<WireMessage> = if shared.is_empty() {
            let history = self.history.read().await;
            history
                .get(workspace_id)
                .map(|deque| deque.iter().map(WireMessage::from).collect())
                .unwrap_or_default()
        } else {
            shared.iter().map(WireMessage::from).collect()
        };
        self.hub
            .send_to(
                &session.id,
                &ServerEvent::ChatHistory(ChatHistory {
                    workspace_id: workspace_id.to_owned(),
                    messages,
                }),
            )
            .await;
        Ok(())
    }

    /// Transport disconnect ends any typing state for the session's account.
    pub async fn handle_disconnect(&self, session: &Session) {
        let email = session.user.email.clone();
        let workspaces: Vec<String> = {
            let typing = self.typing.read().await;
            typing
                .iter()
                .filter(|(_, entries)| entries.contains_key(&email))
                .map(|(ws, _)| ws.clone())
                .collect()
        };
        for workspace_id in workspaces {
            self.clear_typing(session, &workspace_id, &email, None).await;
        }
    }

    // -- Typing sweeper --------------------------------------------------------

    pub fn spawn_typing_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(this.typing_timeout);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = timer.tick() => {}
                }
                this.sweep_typing_once().await;
            }
        });
    }

    /// Evict entries older than the timeout and announce a synthetic stop for
    /// each; shared-store entries expire on their own TTL.
    pub(crate) async fn sweep_typing_once(&self) {
        let cutoff = epoch_ms().saturating_sub(self.typing_timeout.as_millis() as u64);
        let stale: Vec<(String, String)> = {
            let mut typing = self.typing.write().await;
            let mut stale = Vec::new();
            typing.retain(|ws, entries| {
                entries.retain(|email, entry| {
                    if entry.updated_at_ms < cutoff {
                        stale.push((ws.clone(), email.clone()));
                        false
                    } else {
                        true
                    }
                });
                !entries.is_empty()
            });
            stale
        };
        for (workspace_id, email) in stale {
            self.hub
                .broadcast(
                    &workspace_id,
                    &ServerEvent::UserStopTyping(StopTypingBroadcast { email }),
                    None,
                )
                .await;
        }
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", epoch_ms())
    }

    #[cfg(test)]
    pub(crate) async fn history_len(&self, workspace_id: &str) -> usize {
        self.history.read().await.get(workspace_id).map_or(0, VecDeque::len)
    }

    #[cfg(test)]
    pub(crate) async fn local_history(&self, workspace_id: &str) -> Vec<ChatMessage> {
        self.history
            .read()
            .await
            .get(workspace_id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
