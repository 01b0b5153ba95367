//! Raw watch events as produced by the change-notification source

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Type of filesystem event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Directory created
    AddDir,
    /// Directory deleted (cascades to everything below it)
    RemoveDir,
    /// File created
    AddFile,
    /// File content changed
    Change,
    /// File deleted
    RemoveFile,
    /// Directory metadata changed (currently ignored)
    UpdateDirectory,
    /// Anything the source emits that we don't understand
    #[serde(other)]
    Unknown,
}

/// File system event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Type of change
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Path that changed, possibly with trailing slashes
    pub path: String,
    /// Raw file bytes for `add_file` / `change`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Bytes>,
}

impl WatchEvent {
    /// Create an event without payload
    pub fn new(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            payload: None,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn add_dir(path: impl Into<String>) -> Self {
        Self::new(EventKind::AddDir, path)
    }

    pub fn remove_dir(path: impl Into<String>) -> Self {
        Self::new(EventKind::RemoveDir, path)
    }

    pub fn add_file(path: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(EventKind::AddFile, path).with_payload(payload)
    }

    pub fn change(path: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(EventKind::Change, path).with_payload(payload)
    }

    pub fn remove_file(path: impl Into<String>) -> Self {
        Self::new(EventKind::RemoveFile, path)
    }
}
