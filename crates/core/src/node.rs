//! Snapshot nodes

use serde::{Deserialize, Serialize};

/// A single entry in the snapshot tree
///
/// Serialized with a `type` tag so the wire form reads
/// `{"type":"folder"}` or `{"type":"file","content":"..","isBinary":false}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    /// Directory marker, no payload
    Folder,
    /// Regular file
    File {
        /// Decoded text (empty when binary or when decoding failed)
        content: String,
        /// Classifier verdict
        #[serde(rename = "isBinary")]
        is_binary: bool,
    },
}

impl Node {
    /// Create a file node
    pub fn file(content: impl Into<String>, is_binary: bool) -> Self {
        Node::File {
            content: content.into(),
            is_binary,
        }
    }

    /// Check if this node is a folder
    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder)
    }

    /// Text content of a file node, `None` for folders
    pub fn content(&self) -> Option<&str> {
        match self {
            Node::Folder => None,
            Node::File { content, .. } => Some(content),
        }
    }
}
