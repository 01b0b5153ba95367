//! Messages exchanged between the host and the mirror worker

use crate::event::WatchEvent;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Host → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostMessage {
    /// Seed the reconciler; must arrive before any `Event`
    Init {
        snapshot: Snapshot,
        #[serde(rename = "fileCount")]
        file_count: i64,
    },
    /// One notification group from the change source
    Event { events: Vec<WatchEvent> },
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CoreMessage {
    /// Emitted once per reconciled batch
    Update {
        snapshot: Arc<Snapshot>,
        #[serde(rename = "fileCount")]
        file_count: i64,
    },
}
