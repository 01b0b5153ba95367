//! Mirror worker actor
//!
//! Hosts talk to the mirror through a typed mailbox:
//! - `HostMessage::Init` seeds the reconciler (must come first)
//! - `HostMessage::Event` groups go through the coalescer
//! - `CoreMessage::Update` comes back once per reconciled batch
//!
//! Two tasks run behind the handle. The mailbox task owns the coalescer.
//! The reconciler task owns the snapshot and applies one batch at a time. The
//! coalescer's handler waits for the reconciler to acknowledge each batch, so
//! the next batch is not dispatched until the previous update was published.

use crate::classify::{Classifier, Decoder, LookaheadClassifier, StrictUtf8Decoder};
use crate::coalesce::{BatchHandler, Coalescer};
use crate::reconcile::Reconciler;
use async_trait::async_trait;
use mirror_core::{CoreMessage, HostMessage, MirrorConfig, MirrorError, Snapshot, WatchEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands for the reconciler task
enum ReconcileCommand {
    Seed {
        snapshot: Snapshot,
        file_count: i64,
    },
    Apply {
        batch: Vec<Vec<WatchEvent>>,
        done: oneshot::Sender<()>,
    },
}

/// Coalescer handler that hands batches to the reconciler task
struct ReconcileForwarder {
    commands: mpsc::UnboundedSender<ReconcileCommand>,
}

#[async_trait]
impl BatchHandler<Vec<WatchEvent>> for ReconcileForwarder {
    async fn on_batch(&self, batch: Vec<Vec<WatchEvent>>) {
        let groups = batch.len();
        let (done, applied) = oneshot::channel();
        if self
            .commands
            .send(ReconcileCommand::Apply { batch, done })
            .is_err()
        {
            warn!(groups, "Reconciler task is gone, dropping batch");
            return;
        }
        if applied.await.is_err() {
            error!(groups, "Reconciler task died while applying batch, batch lost");
        }
    }
}

/// Handle to a running mirror worker
pub struct WorkerHandle {
    inbox: mpsc::UnboundedSender<HostMessage>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Post a message to the worker
    pub fn send(&self, message: HostMessage) -> Result<(), MirrorError> {
        self.inbox
            .send(message)
            .map_err(|_| MirrorError::WorkerClosed)
    }

    /// Close the mailbox and wait until buffered events are reconciled
    pub async fn shutdown(self) -> Result<(), MirrorError> {
        let WorkerHandle { inbox, task } = self;
        drop(inbox);
        task.await.map_err(|_| MirrorError::WorkerClosed)
    }
}

/// Mirror worker entry points
pub struct MirrorWorker;

impl MirrorWorker {
    /// Spawn a worker with the default classifier and decoder
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: MirrorConfig,
    ) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<CoreMessage>), MirrorError> {
        Self::spawn_with_adapters(config, LookaheadClassifier, StrictUtf8Decoder)
    }

    /// Spawn a worker with custom collaborators
    pub fn spawn_with_adapters<C, D>(
        config: MirrorConfig,
        classifier: C,
        decoder: D,
    ) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<CoreMessage>), MirrorError>
    where
        C: Classifier + 'static,
        D: Decoder + 'static,
    {
        config.validate()?;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        // Placeholder state until the host's init arrives
        let reconciler = Reconciler::with_adapters(
            Snapshot::new(),
            0,
            &config.classifier,
            classifier,
            decoder,
        );
        tokio::spawn(reconcile_loop(command_rx, reconciler, update_tx));

        let coalescer = Coalescer::from_config(
            &config.coalescer,
            ReconcileForwarder {
                commands: command_tx.clone(),
            },
        );

        info!(
            window_ms = config.coalescer.window_ms,
            max_batch_size = config.coalescer.max_batch_size,
            "Starting mirror worker"
        );
        let task = tokio::spawn(mailbox_loop(inbox_rx, coalescer, command_tx));

        Ok((
            WorkerHandle {
                inbox: inbox_tx,
                task,
            },
            update_rx,
        ))
    }
}

async fn mailbox_loop(
    mut inbox: mpsc::UnboundedReceiver<HostMessage>,
    coalescer: Coalescer<Vec<WatchEvent>>,
    commands: mpsc::UnboundedSender<ReconcileCommand>,
) {
    let mut initialized = false;

    while let Some(message) = inbox.recv().await {
        match message {
            HostMessage::Init {
                snapshot,
                file_count,
            } => {
                if initialized {
                    warn!("Received a second init, reseeding snapshot");
                }
                initialized = true;

                info!(entries = snapshot.len(), file_count, "Mirror initialized");
                if commands
                    .send(ReconcileCommand::Seed {
                        snapshot,
                        file_count,
                    })
                    .is_err()
                {
                    error!("Reconciler task is gone, stopping worker");
                    return;
                }
            }
            HostMessage::Event { events } => {
                if commands.is_closed() {
                    error!(
                        pending = coalescer.pending_len(),
                        "Reconciler task is gone, stopping worker"
                    );
                    return;
                }
                if !initialized {
                    let err = MirrorError::NotInitialized {
                        dropped: events.len(),
                    };
                    error!(error = %err, "Protocol violation");
                    continue;
                }
                coalescer.submit(events);
            }
        }
    }

    debug!(pending = coalescer.pending_len(), "Mailbox closed, draining");
    coalescer.drain().await;
    info!("Mirror worker stopped");
}

async fn reconcile_loop(
    mut commands: mpsc::UnboundedReceiver<ReconcileCommand>,
    mut reconciler: Reconciler,
    updates: mpsc::UnboundedSender<CoreMessage>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            ReconcileCommand::Seed {
                snapshot,
                file_count,
            } => reconciler.reseed(snapshot, file_count),
            ReconcileCommand::Apply { batch, done } => {
                let update = reconciler.apply(batch);
                if updates.send(update.into()).is_err() {
                    warn!("Update receiver dropped, snapshot not delivered");
                }
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::Node;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn config(window_ms: u64, max_batch_size: usize) -> MirrorConfig {
        let mut config = MirrorConfig::default();
        config.coalescer.window_ms = window_ms;
        config.coalescer.max_batch_size = max_batch_size;
        config
    }

    fn init(snapshot: Snapshot, file_count: i64) -> HostMessage {
        HostMessage::Init {
            snapshot,
            file_count,
        }
    }

    fn events(events: Vec<WatchEvent>) -> HostMessage {
        HostMessage::Event { events }
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_within_window_produce_one_update() {
        let (worker, mut updates) = MirrorWorker::spawn(config(200, 50)).unwrap();
        worker.send(init(Snapshot::new(), 0)).unwrap();

        worker.send(events(vec![WatchEvent::add_dir("a")])).unwrap();
        sleep(Duration::from_millis(100)).await;
        worker.send(events(vec![WatchEvent::add_file("a/1", "one")])).unwrap();
        worker.send(events(vec![WatchEvent::add_file("a/2", "two")])).unwrap();

        let CoreMessage::Update { snapshot, file_count } = updates.recv().await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(file_count, 2);

        assert!(timeout(Duration::from_secs(5), updates.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_before_init_are_dropped() {
        let (worker, mut updates) = MirrorWorker::spawn(config(50, 50)).unwrap();

        worker.send(events(vec![WatchEvent::add_dir("early")])).unwrap();
        sleep(Duration::from_millis(200)).await;
        assert!(updates.try_recv().is_err());

        worker.send(init(Snapshot::new(), 0)).unwrap();
        worker.send(events(vec![WatchEvent::add_dir("late")])).unwrap();

        let CoreMessage::Update { snapshot, .. } = updates.recv().await.unwrap();
        assert!(!snapshot.contains("early"));
        assert_eq!(snapshot.get("late"), Some(&Node::Folder));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_seeds_counter_and_snapshot() {
        let (worker, mut updates) = MirrorWorker::spawn(config(50, 50)).unwrap();
        let seed: Snapshot = [("keep", Node::file("k", false))].into_iter().collect();

        worker.send(init(seed, 41)).unwrap();
        worker.send(events(vec![WatchEvent::add_file("new", "n")])).unwrap();

        let CoreMessage::Update { snapshot, file_count } = updates.recv().await.unwrap();
        assert_eq!(file_count, 42);
        assert!(snapshot.contains("keep"));
        assert!(snapshot.contains("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_pending_events() {
        let (worker, mut updates) = MirrorWorker::spawn(config(60_000, 50)).unwrap();
        worker.send(init(Snapshot::new(), 0)).unwrap();
        worker.send(events(vec![WatchEvent::add_dir("pending")])).unwrap();

        worker.shutdown().await.unwrap();

        let CoreMessage::Update { snapshot, .. } = updates.try_recv().unwrap();
        assert!(snapshot.contains("pending"));
    }

    /// Classifier that blows up inside the reconciler task
    struct PanickingClassifier;

    impl Classifier for PanickingClassifier {
        fn is_binary(&self, _bytes: &[u8], _lookahead: usize) -> bool {
            panic!("classifier failure");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_reconciler_stops_worker() {
        let (worker, mut updates) = MirrorWorker::spawn_with_adapters(
            config(50, 50),
            PanickingClassifier,
            StrictUtf8Decoder,
        )
        .unwrap();
        worker.send(init(Snapshot::new(), 0)).unwrap();
        worker
            .send(events(vec![WatchEvent::add_file("a.txt", "boom")]))
            .unwrap();

        // The update channel closes without ever carrying an update
        assert!(updates.recv().await.is_none());

        // The next event makes the mailbox notice and stop accepting work
        worker.send(events(vec![WatchEvent::add_dir("late")])).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            worker.send(events(vec![WatchEvent::add_dir("later")])),
            Err(MirrorError::WorkerClosed)
        ));
        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = MirrorWorker::spawn(config(0, 50));
        assert!(matches!(result, Err(MirrorError::InvalidConfig(_))));
    }
}
