//! Snapshot representation of the mirrored tree

use crate::node::Node;
use ahash::AHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Strip every trailing `/` from a path
///
/// All snapshot keys go through this before lookup or mutation, so `"a/b/"`
/// and `"a/b"` address the same node. A bare `"/"` normalizes to `""`.
pub fn normalize_path(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// The complete mirrored tree at a point in time
///
/// Maps normalized paths to nodes. Iteration order carries no meaning.
/// On the wire it is a plain JSON object keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Mapping from normalized path to node
    entries: AHashMap<String, Node>,
}

impl Snapshot {
    /// Create a new empty snapshot
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Insert or overwrite the node at `path`
    pub fn insert(&mut self, path: &str, node: Node) -> Option<Node> {
        self.entries.insert(normalize_path(path).to_owned(), node)
    }

    /// Get the node at `path`
    pub fn get(&self, path: &str) -> Option<&Node> {
        self.entries.get(normalize_path(path))
    }

    /// Check if a node exists at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(normalize_path(path))
    }

    /// Remove the node at `path` only
    pub fn remove(&mut self, path: &str) -> Option<Node> {
        self.entries.remove(normalize_path(path))
    }

    /// Remove the node at `path` and everything below it
    ///
    /// Descendants are keys starting with `path + "/"`; siblings sharing a
    /// name prefix (`a/bx` for `a/b`) are left alone. Returns how many
    /// entries were dropped.
    pub fn remove_tree(&mut self, path: &str) -> usize {
        let path = normalize_path(path);
        let prefix = format!("{path}/");
        let before = self.entries.len();
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        before - self.entries.len()
    }

    /// Iterate over `(path, node)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(path, node)| (path.as_str(), node))
    }

    /// Get the number of entries in the snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: AsRef<str>> FromIterator<(P, Node)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (P, Node)>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for (path, node) in iter {
            snapshot.insert(path.as_ref(), node);
        }
        snapshot
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

// Keys coming from the host are normalized on the way in.
impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = AHashMap::<String, Node>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
