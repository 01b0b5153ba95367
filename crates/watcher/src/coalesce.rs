//! Event coalescing
//!
//! Turns a high-frequency stream of submissions into bounded batches for a
//! single consumer. Two triggers flush the pending buffer:
//! - the idle window elapses with no new submission (timer flush)
//! - the buffer reaches `max_batch_size` (size flush)
//!
//! Batches are delivered one at a time in submission order. A flush first
//! waits for the previously dispatched batch to finish, and only then takes
//! the buffer, so anything submitted during that wait rides along with the
//! current flush. Batches can therefore exceed `max_batch_size` when the
//! consumer is slow; events are never split, dropped or reordered.
//!
//! There is no timeout on the consumer. A handler that never completes stalls
//! every later batch while the buffer keeps growing.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use mirror_core::CoalescerConfig;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Consumer of coalesced batches
#[async_trait]
pub trait BatchHandler<E>: Send + Sync + 'static {
    /// Process one batch; the next batch is held back until this returns
    async fn on_batch(&self, batch: Vec<E>);
}

#[async_trait]
impl<E, F, Fut> BatchHandler<E> for F
where
    E: Send + 'static,
    F: Fn(Vec<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_batch(&self, batch: Vec<E>) {
        (self)(batch).await
    }
}

/// Coalescer state machine: `Idle → Armed → Flushing → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing buffered, nothing running
    Idle,
    /// Events buffered, idle-window timer running
    Armed,
    /// A flush is waiting on the previous batch, or a batch is being handled
    Flushing,
}

/// Completion of the batch currently handed to the consumer
type InFlight = Shared<BoxFuture<'static, ()>>;

/// Armed idle-window timer
struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

struct State<E> {
    /// Buffered events, in submission order
    pending: Vec<E>,
    /// At most one armed timer
    timer: Option<Timer>,
    next_timer_id: u64,
    /// Last dispatched batch (may already be complete)
    in_flight: Option<InFlight>,
    /// Batches dispatched so far
    dispatched: u64,
    /// Consumer is currently running
    batch_running: bool,
    /// Flushes triggered but not yet finished
    waiting_flushes: usize,
}

impl<E> State<E> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

struct Inner<E> {
    window: Duration,
    max_batch_size: usize,
    handler: Arc<dyn BatchHandler<E>>,
    state: Mutex<State<E>>,
}

/// Time- and size-bounded event batcher
///
/// Cheap to clone; all clones feed the same buffer. Must be used from within
/// a tokio runtime.
pub struct Coalescer<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Coalescer<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Send + 'static> Coalescer<E> {
    /// Create a coalescer delivering batches to `on_batch`
    pub fn configure<H>(window: Duration, max_batch_size: usize, on_batch: H) -> Self
    where
        H: BatchHandler<E>,
    {
        Self {
            inner: Arc::new(Inner {
                window,
                max_batch_size,
                handler: Arc::new(on_batch),
                state: Mutex::new(State {
                    pending: Vec::new(),
                    timer: None,
                    next_timer_id: 0,
                    in_flight: None,
                    dispatched: 0,
                    batch_running: false,
                    waiting_flushes: 0,
                }),
            }),
        }
    }

    /// Create a coalescer from configuration
    pub fn from_config<H>(config: &CoalescerConfig, on_batch: H) -> Self
    where
        H: BatchHandler<E>,
    {
        Self::configure(config.window(), config.max_batch_size, on_batch)
    }

    /// Buffer an event
    ///
    /// Reaching `max_batch_size` cancels the timer and flushes right away;
    /// otherwise the idle-window timer is re-armed from now.
    pub fn submit(&self, event: E) {
        let mut state = self.inner.state.lock();
        state.pending.push(event);

        if state.pending.len() >= self.inner.max_batch_size {
            state.cancel_timer();
            state.waiting_flushes += 1;
            drop(state);

            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.flush());
        } else {
            Inner::arm_timer(&self.inner, &mut state);
        }
    }

    /// Flush whatever is buffered and wait until every dispatched batch is done
    pub async fn drain(&self) {
        loop {
            {
                let mut state = self.inner.state.lock();
                state.cancel_timer();
                state.waiting_flushes += 1;
            }
            Arc::clone(&self.inner).flush().await;

            let last = self.inner.state.lock().in_flight.clone();
            if let Some(last) = last {
                last.await;
            }

            // A concurrent flush may have won the dispatch race
            let settled = {
                let state = self.inner.state.lock();
                state.pending.is_empty() && !state.batch_running
            };
            if settled {
                return;
            }
        }
    }

    /// Current state machine phase
    ///
    /// `Flushing` takes precedence over `Armed` when events arrive while a
    /// batch is being handled.
    pub fn phase(&self) -> Phase {
        let state = self.inner.state.lock();
        if state.waiting_flushes > 0 || state.batch_running {
            Phase::Flushing
        } else if state.timer.is_some() {
            Phase::Armed
        } else {
            Phase::Idle
        }
    }

    /// Number of buffered, not yet dispatched events
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }
}

impl<E: Send + 'static> Inner<E> {
    fn arm_timer(this: &Arc<Self>, state: &mut State<E>) {
        state.cancel_timer();
        state.next_timer_id += 1;

        let id = state.next_timer_id;
        let inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.window).await;
            if inner.claim_timer(id) {
                inner.flush().await;
            }
        });

        state.timer = Some(Timer { id, handle });
    }

    /// Turn an expired timer into a pending flush
    ///
    /// Returns false when the timer was replaced or cancelled after its sleep
    /// finished.
    fn claim_timer(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match &state.timer {
            Some(timer) if timer.id == id => {
                state.timer = None;
                state.waiting_flushes += 1;
                true
            }
            _ => false,
        }
    }

    /// Wait for the previous batch, then hand the buffer to the consumer
    ///
    /// Callers register themselves in `waiting_flushes` before spawning this.
    async fn flush(self: Arc<Self>) {
        let (previous, generation) = {
            let state = self.state.lock();
            (state.in_flight.clone(), state.dispatched)
        };

        if let Some(previous) = previous {
            previous.await;
        }

        let mut state = self.state.lock();

        // Another flush dispatched while we waited and took the buffer.
        // Later submissions carry their own timer or size trigger.
        if state.dispatched != generation {
            state.waiting_flushes -= 1;
            return;
        }

        state.cancel_timer();

        if !state.pending.is_empty() {
            let batch = std::mem::take(&mut state.pending);
            let batch_len = batch.len();
            state.dispatched += 1;
            state.batch_running = true;

            debug!(batch_len, batch = state.dispatched, "Dispatching batch");

            let inner = Arc::clone(&self);
            let task = tokio::spawn(async move {
                let outcome = AssertUnwindSafe(inner.handler.on_batch(batch))
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    error!(batch_len, "Batch handler panicked");
                }
                inner.state.lock().batch_running = false;
            });
            state.in_flight = Some(task.map(|_| ()).boxed().shared());
        }

        state.waiting_flushes -= 1;
    }
}
