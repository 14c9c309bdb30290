//! Aggregates N child promises into one (spec §4.2 "promise combiner",
//! §8 scenario 5).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChannelFuture, Promise};
use crate::error::CoreError;

struct State {
    pending: AtomicUsize,
    failure: Mutex<Option<CoreError>>,
    finished: AtomicUsize, // 0 = not finished, 1 = finish() called
    aggregate: Promise<()>,
}

impl State {
    fn maybe_complete(&self) {
        if self.finished.load(Ordering::SeqCst) == 1 && self.pending.load(Ordering::SeqCst) == 0 {
            match self.failure.lock().take() {
                Some(cause) => {
                    self.aggregate.try_failure(cause);
                }
                None => {
                    self.aggregate.try_success(());
                }
            }
        }
    }
}

/// Combines any number of child futures into one aggregate outcome:
/// succeeds iff all children succeed; on the first failure, records the
/// cause and fails the aggregate once `finish` has been called and every
/// child has completed. Adding a child after `finish` is rejected.
pub struct PromiseCombiner {
    state: Arc<State>,
}

impl PromiseCombiner {
    /// Creates a combiner with no children yet attached.
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                pending: AtomicUsize::new(0),
                failure: Mutex::new(None),
                finished: AtomicUsize::new(0),
                aggregate: Promise::new(),
            }),
        }
    }

    /// Returns the aggregate future; observable before or after `finish`.
    pub fn aggregate_future(&self) -> ChannelFuture<()> {
        self.state.aggregate.future()
    }

    /// Adds a child future. Rejected with [`CoreError::StateViolation`] if
    /// `finish` has already been called.
    pub fn add(&self, child: ChannelFuture<impl Send + Sync + 'static>) -> Result<(), CoreError> {
        if self.state.finished.load(Ordering::SeqCst) == 1 {
            return Err(CoreError::state_violation(
                "PromiseCombiner::add called after finish",
            ));
        }
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        child.on_complete(move |outcome| {
            if let Some(cause) = outcome.cause() {
                let mut failure = state.failure.lock();
                if failure.is_none() {
                    failure.replace(cause.duplicate());
                }
            } else if outcome.is_cancelled() {
                let mut failure = state.failure.lock();
                if failure.is_none() {
                    failure.replace(CoreError::Cancelled);
                }
            }
            state.pending.fetch_sub(1, Ordering::SeqCst);
            state.maybe_complete();
        });
        Ok(())
    }

    /// Marks that no further children will be added; once every added
    /// child completes, the aggregate completes.
    pub fn finish(&self) {
        self.state.finished.store(1, Ordering::SeqCst);
        self.state.maybe_complete();
    }
}

impl Default for PromiseCombiner {
    fn default() -> Self {
        Self::new()
    }
}
