// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format event types for the collaboration protocol.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Event names are
//! snake_case; payload fields are camelCase to match the browser clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authenticated user carried in presence records and broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// One entry in a note's ordered member list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteMember {
    pub session_id: String,
    pub user: UserSnapshot,
}

/// Full chat message as stored locally and in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub workspace_id: String,
    pub sender_email: String,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_image: Option<String>,
    pub content: String,
    pub timestamp: u64,
}

/// Maximum sender-image length carried on the wire.
const WIRE_IMAGE_MAX: usize = 200;

/// Broadcast form of a chat message with single-letter field names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub i: String,
    pub w: String,
    pub e: String,
    pub n: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    pub c: String,
    pub t: u64,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        let img = m
            .sender_image
            .as_ref()
            .filter(|img| !img.is_empty() && img.len() < WIRE_IMAGE_MAX)
            .cloned();
        WireMessage {
            i: m.id.clone(),
            w: m.workspace_id.clone(),
            e: m.sender_email.clone(),
            n: m.sender_name.clone(),
            img,
            c: m.content.clone(),
            t: m.timestamp,
        }
    }
}

// -- Inbound events -----------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinWorkspace {
    pub workspace_id: String,
    pub user: UserSnapshot,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRef {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinCollection {
    pub workspace_id: String,
    pub collection_id: String,
    pub user: UserSnapshot,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRef {
    pub workspace_id: String,
    pub collection_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_image: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub workspace_id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingPayload {
    pub workspace_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinNote {
    pub workspace_id: String,
    pub note_id: String,
    pub user: UserSnapshot,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteRef {
    pub workspace_id: String,
    pub note_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub workspace_id: String,
    pub note_id: String,
    /// Opaque cursor value; `null` withdraws the cursor.
    #[serde(default)]
    pub cursor: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteContentUpdate {
    pub workspace_id: String,
    pub note_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinAgenda {
    pub workspace_id: String,
    pub user: UserSnapshot,
}

/// Task fan-out payload; passed through opaquely except for the workspace id.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub workspace_id: String,
    #[serde(flatten)]
    pub payload: Value,
}

/// All events a client may send, tagged by name.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinWorkspace(JoinWorkspace),
    LeaveWorkspace(WorkspaceRef),
    GetWorkspaceUsers(WorkspaceRef),
    JoinCollection(JoinCollection),
    LeaveCollection(CollectionRef),
    GetCollectionsUsers(WorkspaceRef),
    NewMessage(IncomingMessage),
    UserTyping(TypingPayload),
    UserStopTyping(StopTypingPayload),
    GetChatHistory(WorkspaceRef),
    JoinNote(JoinNote),
    LeaveNote(NoteRef),
    GetNoteUsers(NoteRef),
    CursorUpdate(CursorUpdate),
    NoteContentUpdate(NoteContentUpdate),
    JoinAgenda(JoinAgenda),
    LeaveAgenda(WorkspaceRef),
    GetAgendaUsers(WorkspaceRef),
    TaskCreated(TaskEvent),
    TaskUpdated(TaskEvent),
    TaskDeleted(TaskEvent),
    TaskMoved(TaskEvent),
}

impl ClientEvent {
    /// Event name as it appears on the wire, for metrics and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinWorkspace(_) => "join_workspace",
            Self::LeaveWorkspace(_) => "leave_workspace",
            Self::GetWorkspaceUsers(_) => "get_workspace_users",
            Self::JoinCollection(_) => "join_collection",
            Self::LeaveCollection(_) => "leave_collection",
            Self::GetCollectionsUsers(_) => "get_collections_users",
            Self::NewMessage(_) => "new_message",
            Self::UserTyping(_) => "user_typing",
            Self::UserStopTyping(_) => "user_stop_typing",
            Self::GetChatHistory(_) => "get_chat_history",
            Self::JoinNote(_) => "join_note",
            Self::LeaveNote(_) => "leave_note",
            Self::GetNoteUsers(_) => "get_note_users",
            Self::CursorUpdate(_) => "cursor_update",
            Self::NoteContentUpdate(_) => "note_content_update",
            Self::JoinAgenda(_) => "join_agenda",
            Self::LeaveAgenda(_) => "leave_agenda",
            Self::GetAgendaUsers(_) => "get_agenda_users",
            Self::TaskCreated(_) => "task_created",
            Self::TaskUpdated(_) => "task_updated",
            Self::TaskDeleted(_) => "task_deleted",
            Self::TaskMoved(_) => "task_moved",
        }
    }
}

// -- Outbound events ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionUsers {
    pub collection_id: String,
    pub users: Vec<UserSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionUserJoined {
    pub collection_id: String,
    pub user: UserSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionUserLeft {
    pub collection_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub workspace_id: String,
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingBroadcast {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteContentLoaded {
    pub note_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteUsersUpdated {
    pub note_id: String,
    pub users: Vec<NoteMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdated {
    pub note_id: String,
    /// Session id of the cursor owner.
    pub user_id: String,
    pub user_data: UserSnapshot,
    pub cursor: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteContentUpdated {
    pub note_id: String,
    pub content: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgendaUserJoined {
    pub user: UserSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgendaUserLeft {
    pub email: String,
}

/// All events the server may emit, tagged by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UsersConnected(Vec<UserSnapshot>),
    UserJoined(UserSnapshot),
    UserLeft(UserLeft),
    CollectionUserJoined(CollectionUserJoined),
    CollectionUserLeft(CollectionUserLeft),
    CollectionUsersUpdated(CollectionUsers),
    NewMessage(WireMessage),
    ChatHistory(ChatHistory),
    UserTyping(TypingBroadcast),
    UserStopTyping(StopTypingBroadcast),
    NoteContentLoaded(NoteContentLoaded),
    NoteUsersUpdated(NoteUsersUpdated),
    CursorUpdated(CursorUpdated),
    NoteContentUpdated(NoteContentUpdated),
    AgendaUserJoined(AgendaUserJoined),
    AgendaUserLeft(AgendaUserLeft),
    AgendaUsersUpdated(Vec<UserSnapshot>),
    TaskCreated(Value),
    TaskUpdated(Value),
    TaskDeleted(Value),
    TaskMoved(Value),
    WorkspaceTaskCreated(Value),
    WorkspaceTaskUpdated(Value),
    WorkspaceTaskDeleted(Value),
    WorkspaceTaskMoved(Value),
    Error(crate::error::ErrorBody),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UsersConnected(_) => "users_connected",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::CollectionUserJoined(_) => "collection_user_joined",
            Self::CollectionUserLeft(_) => "collection_user_left",
            Self::CollectionUsersUpdated(_) => "collection_users_updated",
            Self::NewMessage(_) => "new_message",
            Self::ChatHistory(_) => "chat_history",
            Self::UserTyping(_) => "user_typing",
            Self::UserStopTyping(_) => "user_stop_typing",
            Self::NoteContentLoaded(_) => "note_content_loaded",
            Self::NoteUsersUpdated(_) => "note_users_updated",
            Self::CursorUpdated(_) => "cursor_updated",
            Self::NoteContentUpdated(_) => "note_content_updated",
            Self::AgendaUserJoined(_) => "agenda_user_joined",
            Self::AgendaUserLeft(_) => "agenda_user_left",
            Self::AgendaUsersUpdated(_) => "agenda_users_updated",
            Self::TaskCreated(_) => "task_created",
            Self::TaskUpdated(_) => "task_updated",
            Self::TaskDeleted(_) => "task_deleted",
            Self::TaskMoved(_) => "task_moved",
            Self::WorkspaceTaskCreated(_) => "workspace_task_created",
            Self::WorkspaceTaskUpdated(_) => "workspace_task_updated",
            Self::WorkspaceTaskDeleted(_) => "workspace_task_deleted",
            Self::WorkspaceTaskMoved(_) => "workspace_task_moved",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
