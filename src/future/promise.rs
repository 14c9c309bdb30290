//! The concrete single-assignment Promise/Future pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::CoreError;
use crate::executor::EventLoop;

use super::Outcome;

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

struct Inner<T> {
    outcome: Option<Outcome<T>>,
    listeners: Vec<Listener<T>>,
    executor: Option<Arc<dyn EventLoop>>,
}

struct Shared<T> {
    state: Mutex<Inner<T>>,
    condvar: Condvar,
}

/// The write half of a single-assignment result slot (spec §4.2).
///
/// May be completed at most once via [`Promise::set_success`] /
/// [`Promise::set_failure`]; the `try_*` variants return `false` instead of
/// panicking when the promise is already completed.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// The read half, obtained from [`Promise::future`]. Clonable; every clone
/// observes the same completion.
pub struct ChannelFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Creates a new, pending promise with no bound executor.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    outcome: None,
                    listeners: Vec::new(),
                    executor: None,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Creates a promise whose listeners will be dispatched via `executor`
    /// when completion happens off that executor's thread.
    pub fn with_executor(executor: Arc<dyn EventLoop>) -> Self {
        let promise = Self::new();
        promise.shared.state.lock().executor = Some(executor);
        promise
    }

    /// Returns a [`ChannelFuture`] handle observing this promise.
    pub fn future(&self) -> ChannelFuture<T> {
        ChannelFuture {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Completes the promise successfully. Panics if already completed —
    /// use [`Promise::try_success`] when completion races are expected.
    pub fn set_success(&self, value: T) {
        assert!(self.try_success(value), "promise already completed");
    }

    /// Completes the promise with a failure. Panics if already completed.
    pub fn set_failure(&self, cause: CoreError) {
        assert!(self.try_failure(cause), "promise already completed");
    }

    /// Attempts to complete successfully; `false` iff already completed.
    pub fn try_success(&self, value: T) -> bool {
        self.complete(Outcome::Success(Arc::new(value)))
    }

    /// Attempts to complete with failure; `false` iff already completed.
    pub fn try_failure(&self, cause: CoreError) -> bool {
        self.complete(Outcome::Failure(Arc::new(cause)))
    }

    /// Fails the promise with a cancellation cause iff it is still
    /// pending. Returns `true` iff this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        self.complete(Outcome::Cancelled)
    }

    /// `true` iff the promise has not yet completed.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().outcome.is_none()
    }

    /// `true` iff `self` and `other` are clones of the same underlying
    /// slot (as opposed to two equal-but-distinct promises).
    pub fn shares_slot_with(&self, other: &Promise<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (listeners, executor) = {
            let mut inner = self.shared.state.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome);
            (std::mem::take(&mut inner.listeners), inner.executor.clone())
        };
        self.shared.condvar.notify_all();
        dispatch_listeners(listeners, &self.shared, executor);
        true
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    /// Clones the handle, not the slot: every clone observes and can
    /// attempt to complete the same underlying promise, consistent with
    /// its single-assignment guard (the first `try_*` call wins).
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn dispatch_listeners<T: Send + Sync + 'static>(
    listeners: Vec<Listener<T>>,
    shared: &Arc<Shared<T>>,
    executor: Option<Arc<dyn EventLoop>>,
) {
    if listeners.is_empty() {
        return;
    }
    let shared = Arc::clone(shared);
    let run = move || {
        let outcome = shared
            .state
            .lock()
            .outcome
            .as_ref()
            .expect("listeners only dispatched post-completion")
            .clone();
        for listener in listeners {
            listener(&outcome);
        }
    };
    match executor {
        Some(ex) if !ex.in_event_loop() => ex.execute(Box::new(run)),
        _ => run(),
    }
}

impl<T: Send + Sync + 'static> ChannelFuture<T> {
    /// Attaches a listener. If the promise is already completed, the
    /// listener runs immediately unless an executor is bound and the
    /// caller is off that executor's thread, in which case it is
    /// trampolined there like any post-completion dispatch.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let executor = {
            let mut inner = self.shared.state.lock();
            if inner.outcome.is_some() {
                inner.executor.clone()
            } else {
                inner.listeners.push(Box::new(listener));
                return;
            }
        };
        dispatch_listeners(vec![Box::new(listener)], &self.shared, executor);
    }

    /// Blocks the calling thread until completion, then re-raises the
    /// failure (if any). Must never be called from within an event-loop
    /// thread (spec §5 "Suspension points").
    pub fn sync(&self) -> Result<Arc<T>, CoreError> {
        self.await_completion();
        let inner = self.shared.state.lock();
        match inner.outcome.as_ref().unwrap() {
            Outcome::Success(v) => Ok(Arc::clone(v)),
            Outcome::Failure(cause) => Err(cause.duplicate()),
            Outcome::Cancelled => Err(CoreError::Cancelled),
        }
    }

    /// Blocks without throwing; callers inspect the outcome afterward via
    /// [`ChannelFuture::outcome`].
    pub fn await_completion(&self) {
        let mut inner = self.shared.state.lock();
        while inner.outcome.is_none() {
            self.shared.condvar.wait(&mut inner);
        }
    }

    /// Returns the outcome if completed, cloning the `Arc` handles inside.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// `true` iff completed (success, failure, or cancelled).
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }
}

impl<T> Clone for ChannelFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A progress report attached to a promise: `(progress, total)`,
/// monotonically increasing (spec §4.2 "progressive variant").
pub struct ProgressivePromise<T> {
    inner: Promise<T>,
    progress: AtomicU64,
    total: u64,
    listeners: Arc<Mutex<Vec<Box<dyn Fn(u64, u64) + Send + Sync>>>>,
}

impl<T: Send + Sync + 'static> ProgressivePromise<T> {
    /// Creates a progressive promise with a known total.
    pub fn new(total: u64) -> Self {
        Self {
            inner: Promise::new(),
            progress: AtomicU64::new(0),
            total,
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reports progress; the stored value never decreases (`fetch_max`).
    pub fn set_progress(&self, progress: u64) {
        let clamped = progress.min(self.total);
        self.progress.fetch_max(clamped, Ordering::SeqCst);
        let current = self.progress.load(Ordering::SeqCst);
        for listener in self.listeners.lock().iter() {
            listener(current, self.total);
        }
    }

    /// Registers a progress listener.
    pub fn on_progress<F>(&self, listener: F)
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    /// The underlying promise, for completion.
    pub fn promise(&self) -> &Promise<T> {
        &self.inner
    }

    /// Returns a future observing completion.
    pub fn future(&self) -> ChannelFuture<T> {
        self.inner.future()
    }
}

/// Ready-made listener constants mirroring Netty's `ChannelFutureListener`.
pub struct ChannelFutureListener;

impl ChannelFutureListener {
    /// A listener that ignores the outcome entirely — used for
    /// fire-and-forget internal writes where completion is not observed.
    pub fn ignore<T>() -> impl FnOnce(&Outcome<T>) + Send + 'static {
        |_outcome| {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn single_assignment_rejects_second_completion() {
        let promise: Promise<u32> = Promise::new();
        assert!(promise.try_success(1));
        assert!(!promise.try_success(2));
        assert!(!promise.try_failure(CoreError::Cancelled));
    }

    #[test]
    fn post_completion_listener_runs_immediately() {
        let promise: Promise<u32> = Promise::new();
        promise.set_success(7);
        let future = promise.future();
        let observed = Arc::new(AtomicBool::new(false));
        let observed2 = Arc::clone(&observed);
        future.on_complete(move |outcome| {
            assert!(outcome.is_success());
            observed2.store(true, Ordering::SeqCst);
        });
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_only_succeeds_while_pending() {
        let promise: Promise<u32> = Promise::new();
        assert!(promise.cancel());
        assert!(!promise.try_success(1));
        assert!(promise.future().outcome().unwrap().is_cancelled());
    }

    #[test]
    fn progressive_promise_reports_monotonically() {
        let progressive: ProgressivePromise<()> = ProgressivePromise::new(100);
        let last = Arc::new(Mutex::new(0u64));
        let last2 = Arc::clone(&last);
        progressive.on_progress(move |p, _total| {
            let mut last = last2.lock();
            assert!(p >= *last);
            *last = p;
        });
        progressive.set_progress(10);
        progressive.set_progress(50);
        progressive.set_progress(30); // must not regress the stored value
        assert_eq!(*last.lock(), 50);
    }
}
