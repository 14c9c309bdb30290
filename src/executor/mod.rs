//! Executor / EventLoop contract (spec §4.1).
//!
//! A single-threaded, cooperative task runner that owns exactly one
//! selector-equivalent loop. Channels are bound to one event loop for their
//! entire lifetime; a loop may own many channels. No code path inside a
//! handler callback yields — "suspension" is just returning from the
//! callback and letting the loop pick the next ready event.

mod group;
mod select_strategy;
mod single_thread;

pub use group::EventLoopGroup;
pub use select_strategy::SelectStrategy;
pub use single_thread::SingleThreadEventLoop;

use std::time::Duration;

/// A task the event loop can run. Boxed so the queue can be homogeneous.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The minimal capability every executor exposes: FIFO task submission from
/// any thread, and thread-affinity introspection.
///
/// # Contract
/// - `execute` is safe to call from any thread, including the loop's own.
/// - `in_event_loop` returns `true` iff the calling thread is the loop's
///   owned thread; pipeline propagation trampolines through `execute` when
///   this is false (spec §4.5).
pub trait EventLoop: Send + Sync + 'static {
    /// Enqueue `task` for FIFO execution on this loop.
    fn execute(&self, task: Task);

    /// Defer `task` to run no sooner than `delay` from now. Scheduled tasks
    /// never run *during* a handler callback, only between loop iterations.
    fn schedule(&self, task: Task, delay: Duration);

    /// `true` iff the current thread is this loop's owned thread.
    fn in_event_loop(&self) -> bool;

    /// Begin a graceful two-phase shutdown: a quiet period during which
    /// newly submitted tasks still run, followed by hard termination once
    /// `timeout` elapses. Returns a future that completes when termination
    /// finishes.
    fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> crate::future::ChannelFuture<()>;
}
