//! Snapshot reconciliation
//!
//! Folds a batch of watch events into the current snapshot. Each batch is
//! applied to a private working copy; the copy replaces the published
//! snapshot only once every event has been folded in, so readers never see a
//! half-applied batch.

use crate::classify::{Classifier, Decoder, LookaheadClassifier, StrictUtf8Decoder};
use mirror_core::{ClassifierConfig, CoreMessage, EventKind, Node, Snapshot, WatchEvent};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of reconciling one batch
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Published snapshot, shared read-only with consumers
    pub snapshot: Arc<Snapshot>,
    /// Running `add_file` minus `remove_file` total
    pub file_count: i64,
}

impl From<Update> for CoreMessage {
    fn from(update: Update) -> Self {
        CoreMessage::Update {
            snapshot: update.snapshot,
            file_count: update.file_count,
        }
    }
}

/// Owner of the mirrored snapshot and file counter
pub struct Reconciler {
    /// Last published snapshot
    snapshot: Arc<Snapshot>,

    /// Independent running total; never recomputed from the snapshot and
    /// allowed to go negative on unmatched removals
    file_count: i64,

    /// Bytes the classifier may inspect
    lookahead: usize,

    classifier: Box<dyn Classifier>,
    decoder: Box<dyn Decoder>,
}

impl Reconciler {
    /// Create a reconciler with the default classifier and decoder
    pub fn new(snapshot: Snapshot, file_count: i64, config: &ClassifierConfig) -> Self {
        Self::with_adapters(
            snapshot,
            file_count,
            config,
            LookaheadClassifier,
            StrictUtf8Decoder,
        )
    }

    /// Create a reconciler with custom collaborators
    pub fn with_adapters<C, D>(
        snapshot: Snapshot,
        file_count: i64,
        config: &ClassifierConfig,
        classifier: C,
        decoder: D,
    ) -> Self
    where
        C: Classifier + 'static,
        D: Decoder + 'static,
    {
        Self {
            snapshot: Arc::new(snapshot),
            file_count,
            lookahead: config.lookahead_bytes,
            classifier: Box::new(classifier),
            decoder: Box::new(decoder),
        }
    }

    /// Replace the owned state wholesale
    pub fn reseed(&mut self, snapshot: Snapshot, file_count: i64) {
        self.snapshot = Arc::new(snapshot);
        self.file_count = file_count;
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn file_count(&self) -> i64 {
        self.file_count
    }

    /// Apply a batch made of notification groups
    ///
    /// Groups are flattened in order before anything is applied.
    pub fn apply(&mut self, batch: Vec<Vec<WatchEvent>>) -> Update {
        self.apply_events(batch.into_iter().flatten())
    }

    /// Apply events in order and publish the result
    pub fn apply_events<I>(&mut self, events: I) -> Update
    where
        I: IntoIterator<Item = WatchEvent>,
    {
        let mut working = Snapshot::clone(&self.snapshot);
        let mut file_count = self.file_count;
        let mut applied = 0usize;

        for event in events {
            applied += 1;
            let WatchEvent { kind, path, payload } = event;

            match kind {
                EventKind::AddDir => {
                    working.insert(&path, Node::Folder);
                }
                EventKind::RemoveDir => {
                    working.remove_tree(&path);
                }
                EventKind::AddFile => {
                    file_count += 1;
                    let node = self.file_node(&path, payload.as_deref());
                    working.insert(&path, node);
                }
                EventKind::Change => {
                    let node = self.file_node(&path, payload.as_deref());
                    working.insert(&path, node);
                }
                EventKind::RemoveFile => {
                    file_count -= 1;
                    working.remove(&path);
                }
                EventKind::UpdateDirectory | EventKind::Unknown => {}
            }
        }

        self.snapshot = Arc::new(working);
        self.file_count = file_count;

        debug!(
            events = applied,
            entries = self.snapshot.len(),
            file_count,
            "Reconciled batch"
        );

        Update {
            snapshot: self.snapshot(),
            file_count,
        }
    }

    /// Classify and decode a file payload
    ///
    /// Missing or empty payloads are empty text. Binary payloads are never
    /// decoded. Text that fails strict decoding degrades to empty content.
    fn file_node(&self, path: &str, payload: Option<&[u8]>) -> Node {
        let bytes = match payload {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Node::file("", false),
        };

        if self.classifier.is_binary(bytes, self.lookahead) {
            return Node::file("", true);
        }

        match self.decoder.decode_utf8_strict(bytes) {
            Ok(content) => Node::file(content, false),
            Err(e) => {
                warn!(path, error = %e, "Failed to decode file content");
                Node::file("", false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler(snapshot: Snapshot, file_count: i64) -> Reconciler {
        Reconciler::new(snapshot, file_count, &ClassifierConfig::default())
    }

    /// Classifier that calls everything binary
    struct AlwaysBinary;

    impl Classifier for AlwaysBinary {
        fn is_binary(&self, _bytes: &[u8], _lookahead: usize) -> bool {
            true
        }
    }

    /// Classifier that calls everything text, so bad bytes reach the decoder
    struct AlwaysText;

    impl Classifier for AlwaysText {
        fn is_binary(&self, _bytes: &[u8], _lookahead: usize) -> bool {
            false
        }
    }

    #[test]
    fn test_cascading_remove_dir() {
        let snapshot: Snapshot = [
            ("a/b", Node::Folder),
            ("a/b/c", Node::file("c", false)),
            ("a/bx", Node::file("x", false)),
        ]
        .into_iter()
        .collect();
        let mut reconciler = reconciler(snapshot, 2);

        let update = reconciler.apply_events([WatchEvent::remove_dir("a/b")]);

        assert!(!update.snapshot.contains("a/b"));
        assert!(!update.snapshot.contains("a/b/c"));
        assert_eq!(update.snapshot.get("a/bx"), Some(&Node::file("x", false)));
        // Directory removal never touches the counter
        assert_eq!(update.file_count, 2);
    }

    #[test]
    fn test_trailing_slashes_are_normalized() {
        let mut reconciler = reconciler(Snapshot::new(), 0);

        let update = reconciler.apply_events([
            WatchEvent::add_dir("/src//"),
            WatchEvent::add_file("/src/a.txt/", "x"),
        ]);

        assert_eq!(update.snapshot.len(), 2);
        assert_eq!(update.snapshot.get("/src"), Some(&Node::Folder));
        assert!(update.snapshot.contains("/src/a.txt"));
    }

    #[test]
    fn test_folder_readd_is_idempotent() {
        let mut reconciler = reconciler(Snapshot::new(), 0);

        let update = reconciler.apply_events([WatchEvent::add_dir("d"), WatchEvent::add_dir("d/")]);

        assert_eq!(update.snapshot.len(), 1);
        assert_eq!(update.snapshot.get("d"), Some(&Node::Folder));
    }

    #[test]
    fn test_add_dir_overwrites_file() {
        let snapshot: Snapshot = [("p", Node::file("old", false))].into_iter().collect();
        let mut reconciler = reconciler(snapshot, 1);

        let update = reconciler.apply_events([WatchEvent::add_dir("p")]);

        assert_eq!(update.snapshot.get("p"), Some(&Node::Folder));
    }

    #[test]
    fn test_counter_accounting() {
        let mut reconciler = reconciler(Snapshot::new(), 10);

        let update = reconciler.apply(vec![
            vec![
                WatchEvent::add_file("a", "1"),
                WatchEvent::add_file("b", "2"),
                WatchEvent::add_file("c", "3"),
            ],
            vec![WatchEvent::remove_file("x"), WatchEvent::remove_file("y")],
            vec![WatchEvent::change("a", "changed")],
        ]);

        // initial + adds - removes; change leaves it alone
        assert_eq!(update.file_count, 10 + 3 - 2);
        assert_eq!(reconciler.file_count(), 11);
    }

    #[test]
    fn test_unmatched_remove_drives_counter_negative() {
        let mut reconciler = reconciler(Snapshot::new(), 0);

        let update = reconciler.apply_events([
            WatchEvent::remove_file("ghost-1"),
            WatchEvent::remove_file("ghost-2"),
        ]);

        assert_eq!(update.file_count, -2);
        assert!(update.snapshot.is_empty());
    }

    #[test]
    fn test_binary_payload_never_has_content() {
        let mut reconciler = Reconciler::with_adapters(
            Snapshot::new(),
            0,
            &ClassifierConfig::default(),
            AlwaysBinary,
            StrictUtf8Decoder,
        );

        let update = reconciler.apply_events([
            WatchEvent::add_file("img.png", "perfectly valid text"),
            WatchEvent::change("blob", &b"\x00\x01\x02"[..]),
        ]);

        assert_eq!(update.snapshot.get("img.png"), Some(&Node::file("", true)));
        assert_eq!(update.snapshot.get("blob"), Some(&Node::file("", true)));
    }

    #[test]
    fn test_default_classifier_flags_binary() {
        let mut reconciler = reconciler(Snapshot::new(), 0);

        let update = reconciler.apply_events([WatchEvent::add_file(
            "logo.png",
            &b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR"[..],
        )]);

        assert_eq!(update.snapshot.get("logo.png"), Some(&Node::file("", true)));
    }

    #[test]
    fn test_decode_failure_degrades_to_empty() {
        let mut reconciler = Reconciler::with_adapters(
            Snapshot::new(),
            0,
            &ClassifierConfig::default(),
            AlwaysText,
            StrictUtf8Decoder,
        );

        let update = reconciler.apply_events([
            WatchEvent::add_file("bad.txt", &[b'h', b'i', 0xff][..]),
            WatchEvent::add_file("good.txt", "fine"),
        ]);

        // The failure does not abort the rest of the batch
        assert_eq!(update.snapshot.get("bad.txt"), Some(&Node::file("", false)));
        assert_eq!(update.snapshot.get("good.txt"), Some(&Node::file("fine", false)));
        assert_eq!(update.file_count, 2);
    }

    #[test]
    fn test_missing_and_empty_payloads() {
        let mut reconciler = Reconciler::with_adapters(
            Snapshot::new(),
            0,
            &ClassifierConfig::default(),
            AlwaysBinary,
            StrictUtf8Decoder,
        );

        let update = reconciler.apply_events([
            WatchEvent::new(EventKind::AddFile, "none"),
            WatchEvent::add_file("empty", Vec::<u8>::new()),
        ]);

        // Classifier is never consulted for empty payloads
        assert_eq!(update.snapshot.get("none"), Some(&Node::file("", false)));
        assert_eq!(update.snapshot.get("empty"), Some(&Node::file("", false)));
    }

    #[test]
    fn test_ignored_kinds_are_noops() {
        let snapshot: Snapshot = [("d", Node::Folder)].into_iter().collect();
        let mut reconciler = reconciler(snapshot.clone(), 4);

        let update = reconciler.apply_events([
            WatchEvent::new(EventKind::UpdateDirectory, "d"),
            WatchEvent::new(EventKind::Unknown, "d"),
        ]);

        assert_eq!(*update.snapshot, snapshot);
        assert_eq!(update.file_count, 4);
    }

    #[test]
    fn test_events_apply_in_order() {
        let mut reconciler = reconciler(Snapshot::new(), 0);

        let update = reconciler.apply(vec![
            vec![WatchEvent::add_dir("a"), WatchEvent::add_file("a/f", "v1")],
            vec![WatchEvent::remove_dir("a")],
            vec![WatchEvent::add_dir("a"), WatchEvent::change("a/f", "v2")],
        ]);

        assert_eq!(update.snapshot.get("a"), Some(&Node::Folder));
        assert_eq!(update.snapshot.get("a/f"), Some(&Node::file("v2", false)));
        assert_eq!(update.snapshot.len(), 2);
    }

    #[test]
    fn test_published_snapshot_is_not_mutated_by_later_batches() {
        let mut reconciler = reconciler(Snapshot::new(), 0);

        let first = reconciler.apply_events([WatchEvent::add_dir("a")]);
        let second = reconciler.apply_events([WatchEvent::remove_dir("a"), WatchEvent::add_dir("b")]);

        assert!(first.snapshot.contains("a"));
        assert!(!first.snapshot.contains("b"));
        assert!(second.snapshot.contains("b"));
        assert!(Arc::ptr_eq(&second.snapshot, &reconciler.snapshot()));
    }

    #[test]
    fn test_reseed_replaces_state() {
        let mut reconciler = reconciler(Snapshot::new(), 0);
        reconciler.apply_events([WatchEvent::add_file("a", "x")]);

        let seed: Snapshot = [("z", Node::Folder)].into_iter().collect();
        reconciler.reseed(seed.clone(), 7);

        assert_eq!(*reconciler.snapshot(), seed);
        assert_eq!(reconciler.file_count(), 7);
    }
}
