//! Event coalescing and snapshot reconciliation for treemirror
//!
//! This crate provides:
//! - Time- and size-bounded event batching (`Coalescer`)
//! - Binary/text classification and strict decoding adapters
//! - The reconciliation state machine (`Reconciler`)
//! - A worker actor speaking the init/event/update protocol

pub mod classify;
pub mod coalesce;
pub mod reconcile;
pub mod worker;

// Re-exports
pub use classify::{Classifier, Decoder, LookaheadClassifier, StrictUtf8Decoder};
pub use coalesce::{BatchHandler, Coalescer, Phase};
pub use reconcile::{Reconciler, Update};
pub use worker::{MirrorWorker, WorkerHandle};
