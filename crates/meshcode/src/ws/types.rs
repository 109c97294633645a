//! WebSocket message types for the collaboration channel.
//!
//! Frames are JSON objects `{"type": "<event>", "payload": {...}}`. Payload
//! field names are camelCase; unit events carry no payload.

use serde::{Deserialize, Serialize};

use crate::workspace::NodeKind;

// ============================================================================
// Events (Server -> Client)
// ============================================================================

/// Events sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum WsEvent {
    // ========== Connection Events ==========
    /// WebSocket connection established.
    Connected,

    /// Heartbeat/keepalive ping.
    Ping,

    /// A command from this connection failed.
    Error { message: String },

    // ========== File Events ==========
    /// Content of a file just joined.
    FileContent { path: String, content: String },

    /// Another member edited the file.
    FileEdited { path: String, content: String },

    FileCreated {
        path: String,
        name: String,
        #[serde(rename = "type")]
        kind: NodeKind,
    },

    FileDeleted { path: String },

    FileRenamed {
        path: String,
        #[serde(rename = "newPath")]
        new_path: String,
        #[serde(rename = "newName")]
        new_name: String,
    },

    /// Another member reported a name or path change it made locally.
    FileMetadataChanged {
        #[serde(rename = "oldPath")]
        old_path: String,
        #[serde(rename = "newPath")]
        new_path: String,
        #[serde(rename = "newName")]
        new_name: String,
    },

    /// The tree changed outside the channel; clients should reload it.
    RefreshFiles,

    // ========== Terminal Events ==========
    TerminalOutput { data: String },

    TerminalError { message: String },
}

impl WsEvent {
    pub fn error(message: impl Into<String>) -> Self {
        WsEvent::Error {
            message: message.into(),
        }
    }

    pub fn terminal_output(data: impl Into<String>) -> Self {
        WsEvent::TerminalOutput { data: data.into() }
    }
}

// ============================================================================
// Commands (Client -> Server)
// ============================================================================

/// Commands sent from clients to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum WsCommand {
    /// Keepalive response.
    Pong,

    // ========== Rooms ==========
    JoinProject { project: String },

    JoinFile { project: String, path: String },

    LeaveFile { project: String, path: String },

    // ========== Editing ==========
    EditFile {
        project: String,
        path: String,
        content: String,
    },

    CreateFile {
        project: String,
        #[serde(rename = "parentPath", default)]
        parent_path: Option<String>,
        name: String,
        #[serde(rename = "type")]
        kind: NodeKind,
        #[serde(default)]
        content: Option<String>,
    },

    RenameFile {
        project: String,
        path: String,
        #[serde(rename = "newName")]
        new_name: String,
    },

    DeleteFile { project: String, path: String },

    /// Relayed to the rest of the project room as-is; nothing is executed.
    FileMetadataChanged {
        project: String,
        #[serde(rename = "oldPath")]
        old_path: String,
        #[serde(rename = "newPath")]
        new_path: String,
        #[serde(rename = "newName")]
        new_name: String,
    },

    // ========== Terminal ==========
    StartTerminal {
        #[serde(rename = "containerHandle", default)]
        container_handle: Option<String>,
        #[serde(default)]
        project: Option<String>,
    },

    TerminalInput { data: String },
}
