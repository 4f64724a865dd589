// Session, chat message, and undo/redo history models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generated file map: file name -> full HTML source
pub type FileMap = BTreeMap<String, String>;

/// A chat workspace: conversation, generated files, and linear undo/redo history.
/// One session exists per workspace and is owned by the user who created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Display title
    pub title: String,
    /// Conversation in insertion order; fed back to the model as context
    pub messages: Vec<ChatMessage>,
    /// Authoritative file contents, keyed by file name
    pub generated_files: FileMap,
    /// File currently shown in the preview
    pub active_file_name: Option<String>,
    /// Undo/redo stack of full file-map snapshots
    pub history: Vec<Snapshot>,
    /// Index of the current history entry; -1 while history is empty
    pub history_index: i64,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

/// Default assistant greeting shown in a fresh session
const WELCOME_MESSAGE: &str =
    "Hi! Describe the site you want to build and I'll generate the pages for you.";

impl Session {
    /// Create an empty session: one welcome message, no files, no history.
    pub fn empty(id: String) -> Self {
        Self {
            id,
            title: "New site".to_string(),
            messages: vec![ChatMessage::model(WELCOME_MESSAGE.to_string())],
            generated_files: FileMap::new(),
            active_file_name: None,
            history: Vec::new(),
            history_index: -1,
            created_at: Utc::now(),
        }
    }

    /// Append a message to the conversation (append-only, order is meaningful).
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Capture the current file map as a new history entry.
    /// Any redo tail beyond the current index is discarded first
    /// (linear truncation-on-branch semantics).
    pub fn push_snapshot(&mut self) {
        let keep = (self.history_index + 1).max(0) as usize;
        self.history.truncate(keep);
        self.history.push(Snapshot {
            files: self.generated_files.clone(),
        });
        self.history_index = self.history.len() as i64 - 1;
    }

    /// Step back one history entry, restoring its file map.
    /// Returns false (state unchanged) at the floor.
    pub fn undo(&mut self) -> bool {
        if self.history_index <= 0 {
            return false;
        }
        self.history_index -= 1;
        self.restore_current();
        true
    }

    /// Step forward one history entry, restoring its file map.
    /// Returns false (state unchanged) at the ceiling.
    pub fn redo(&mut self) -> bool {
        if self.history_index + 1 >= self.history.len() as i64 {
            return false;
        }
        self.history_index += 1;
        self.restore_current();
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.history_index + 1 < self.history.len() as i64
    }

    fn restore_current(&mut self) {
        if let Some(snapshot) = self.history.get(self.history_index as usize) {
            self.generated_files = snapshot.files.clone();
        }
        // Active file may no longer exist in the restored map
        if let Some(active) = &self.active_file_name {
            if !self.generated_files.contains_key(active) {
                self.active_file_name = self.generated_files.keys().next().cloned();
            }
        }
    }
}

/// A full copy of the file map at one point in the undo/redo history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub files: FileMap,
}

/// One conversation entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            kind: MessageKind::Text,
            content,
        }
    }

    pub fn model(content: String) -> Self {
        Self {
            role: MessageRole::Model,
            kind: MessageKind::Text,
            content,
        }
    }
}

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Model,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Model => write!(f, "model"),
        }
    }
}

/// Message content kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
}
