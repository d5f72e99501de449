// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain handlers and the per-session event dispatcher.

pub mod agenda;
pub mod chat;
pub mod collection;
pub mod note;
pub mod workspace;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::events::{ClientEvent, ServerEvent};
use crate::metrics::Metrics;
use crate::store::SharedStore;
use crate::transport::hub::{Hub, Session};

pub use agenda::{AgendaHandler, TaskAction};
pub use chat::ChatHandler;
pub use collection::CollectionPresence;
pub use note::NoteHandler;
pub use workspace::WorkspacePresence;

/// All domain handlers, wired once and shared by every session task.
pub struct Handlers {
    hub: Arc<Hub>,
    metrics: Arc<Metrics>,
    pub workspace: Arc<WorkspacePresence>,
    pub collection: Arc<CollectionPresence>,
    pub chat: Arc<ChatHandler>,
    pub note: Arc<NoteHandler>,
    pub agenda: Arc<AgendaHandler>,
}

impl Handlers {
    pub fn new(
        hub: Arc<Hub>,
        store: SharedStore,
        metrics: Arc<Metrics>,
        config: &GatewayConfig,
    ) -> Self {
        let workspace = Arc::new(WorkspacePresence::new(
            Arc::clone(&hub),
            store.clone(),
            Arc::clone(&metrics),
            config.reconnect_grace(),
        ));
        let collection = Arc::new(CollectionPresence::new(Arc::clone(&hub), store.clone()));
        let chat = Arc::new(ChatHandler::new(
            Arc::clone(&hub),
            store.clone(),
            config.message_limit,
            config.typing_timeout(),
        ));
        let note = Arc::new(NoteHandler::new(Arc::clone(&hub), store.clone()));
        let agenda = Arc::new(AgendaHandler::new(Arc::clone(&hub), store));
        Self { hub, metrics, workspace, collection, chat, note, agenda }
    }

    pub fn spawn_sweepers(&self, config: &GatewayConfig, shutdown: CancellationToken) {
        self.workspace
            .spawn_duplicate_sweeper(config.duplicate_sweep_interval(), shutdown.clone());
        self.chat.spawn_typing_sweeper(shutdown);
    }

    /// Route one inbound frame. Handler failures are logged, counted, and
    /// reported to the offending session only.
    pub async fn dispatch(&self, session: &Session, text: &str) {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                self.report(session, "unparseable", GatewayError::Validation(e.to_string()))
                    .await;
                return;
            }
        };
        let name = event.name();
        let started = Instant::now();
        let result = self.route(session, event).await;
        match result {
            Ok(()) => self.metrics.message_processed(name, started.elapsed()),
            Err(e) => self.report(session, name, e).await,
        }
    }

    async fn route(&self, session: &Session, event: ClientEvent) -> Result<(), GatewayError> {
        match event {
            ClientEvent::JoinWorkspace(p) => {
                self.workspace.join(session, &p.workspace_id, p.user).await
            }
            ClientEvent::LeaveWorkspace(p) => self.workspace.leave(session, &p.workspace_id).await,
            ClientEvent::GetWorkspaceUsers(p) => {
                self.workspace.get_users(session, &p.workspace_id).await
            }
            ClientEvent::JoinCollection(p) => {
                self.collection.join(session, &p.workspace_id, &p.collection_id, p.user).await
            }
            ClientEvent::LeaveCollection(p) => {
                self.collection.leave(session, &p.workspace_id, &p.collection_id).await
            }
            ClientEvent::GetCollectionsUsers(p) => {
                self.collection.get_collections_users(session, &p.workspace_id).await
            }
            ClientEvent::NewMessage(p) => self.chat.new_message(session, p).await,
            ClientEvent::UserTyping(p) => self.chat.user_typing(session, p).await,
            ClientEvent::UserStopTyping(p) => {
                self.chat.user_stop_typing(session, &p.workspace_id, &p.email).await
            }
            ClientEvent::GetChatHistory(p) => self.chat.history(session, &p.workspace_id).await,
            ClientEvent::JoinNote(p) => {
                self.note.join(session, &p.workspace_id, &p.note_id, p.user).await
            }
            ClientEvent::LeaveNote(p) => {
                self.note.leave(session, &p.workspace_id, &p.note_id).await
            }
            ClientEvent::GetNoteUsers(p) => {
                self.note.get_users(session, &p.workspace_id, &p.note_id).await
            }
            ClientEvent::CursorUpdate(p) => {
                self.note.cursor_update(session, &p.workspace_id, &p.note_id, p.cursor).await
            }
            ClientEvent::NoteContentUpdate(p) => {
                self.note.content_update(session, &p.workspace_id, &p.note_id, p.content).await
            }
            ClientEvent::JoinAgenda(p) => self.agenda.join(session, &p.workspace_id, p.user).await,
            ClientEvent::LeaveAgenda(p) => self.agenda.leave(session, &p.workspace_id).await,
            ClientEvent::GetAgendaUsers(p) => {
                self.agenda.get_users(session, &p.workspace_id).await
            }
            ClientEvent::TaskCreated(p) => {
                self.agenda.task_event(session, TaskAction::Created, p).await
            }
            ClientEvent::TaskUpdated(p) => {
                self.agenda.task_event(session, TaskAction::Updated, p).await
            }
            ClientEvent::TaskDeleted(p) => {
                self.agenda.task_event(session, TaskAction::Deleted, p).await
            }
            ClientEvent::TaskMoved(p) => {
                self.agenda.task_event(session, TaskAction::Moved, p).await
            }
        }
    }

    async fn report(&self, session: &Session, event: &str, err: GatewayError) {
        warn!(session_id = %session.id, event, err = %err, "handler error");
        self.metrics.error_occurred(err.code(), &err.to_string());
        self.hub.send_to(&session.id, &ServerEvent::Error(err.to_error_body())).await;
    }

    /// Transport disconnect: typing, note, collection, and agenda state drop
    /// immediately; workspace presence enters the grace window.
    pub async fn handle_disconnect(&self, session: &Session) {
        self.chat.handle_disconnect(session).await;
        self.note.handle_disconnect(session).await;
        self.collection.handle_disconnect(session).await;
        self.agenda.handle_disconnect(session).await;
        self.workspace.handle_disconnect(session).await;
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
