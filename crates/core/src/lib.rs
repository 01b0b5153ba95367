//! Core data model for treemirror
//!
//! This crate provides:
//! - The snapshot tree (`Snapshot`, `Node`) and path normalization
//! - Raw watch events and the host/core wire messages
//! - Error types shared by the watcher crate
//! - Configuration (`MirrorConfig`)

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod node;
pub mod snapshot;

// Re-exports
pub use config::{ClassifierConfig, CoalescerConfig, MirrorConfig};
pub use error::{ConfigError, DecodeError, MirrorError};
pub use event::{EventKind, WatchEvent};
pub use message::{CoreMessage, HostMessage};
pub use node::Node;
pub use snapshot::{normalize_path, Snapshot};
