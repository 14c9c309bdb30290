//! A concrete single-threaded event loop: a FIFO task queue plus a
//! scheduled-task heap, run on one dedicated OS thread.
//!
//! The real selector (the transport backend's `register`/`select`
//! primitive, spec §6) is an external collaborator this crate does not
//! implement; this loop still drives real ordering and shutdown semantics
//! and is what `Channel`/`Pipeline` propagation is tested against.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use super::{EventLoop, SelectStrategy, Task};
use crate::future::Promise;

struct ScheduledTask {
    due: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}
impl Eq for ScheduledTask {}
impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.sequence).cmp(&(other.due, other.sequence))
    }
}

struct Shared {
    immediate: SegQueue<Task>,
    scheduled: Mutex<BinaryHeap<Reverse<ScheduledTask>>>,
    sequence: AtomicU64,
    wake: Condvar,
    wake_guard: Mutex<bool>,
    shutting_down: AtomicBool,
    quiet_until: Mutex<Option<Instant>>,
    hard_deadline: Mutex<Option<Instant>>,
    terminated: AtomicBool,
}

/// A single-threaded cooperative task runner bound to exactly one owned
/// thread for its entire lifetime.
pub struct SingleThreadEventLoop {
    shared: Arc<Shared>,
    owner_thread: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadEventLoop {
    /// Spawns the worker thread and returns a handle bound to it.
    pub fn spawn(name: impl Into<String>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            immediate: SegQueue::new(),
            scheduled: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            wake: Condvar::new(),
            wake_guard: Mutex::new(false),
            shutting_down: AtomicBool::new(false),
            quiet_until: Mutex::new(None),
            hard_deadline: Mutex::new(None),
            terminated: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                tx.send(thread::current().id()).ok();
                run_loop(worker_shared);
            })
            .expect("failed to spawn event loop thread");
        let owner_thread = rx.recv().expect("event loop thread failed to start");

        Arc::new(Self {
            shared,
            owner_thread,
            worker: Mutex::new(Some(handle)),
        })
    }

    fn notify(&self) {
        let mut guard = self.shared.wake_guard.lock().unwrap();
        *guard = true;
        self.shared.wake.notify_one();
    }
}

fn run_loop(shared: Arc<Shared>) {
    const MAX_TASKS_PER_ITERATION: usize = 1024;
    loop {
        // Step 1: select strategy — block only if nothing is pending, so a
        // non-empty task queue never waits behind a selector timeout.
        let next_due = shared
            .scheduled
            .lock()
            .unwrap()
            .peek()
            .map(|Reverse(t)| t.due);
        if let SelectStrategy::Select = SelectStrategy::default_for_pending_tasks(shared.immediate.len()) {
            let mut guard = shared.wake_guard.lock().unwrap();
            while !*guard {
                let timeout = next_due
                    .map(|due| due.saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::from_millis(50));
                if timeout.is_zero() {
                    break;
                }
                let (g, timeout_result) = shared.wake.wait_timeout(guard, timeout).unwrap();
                guard = g;
                if timeout_result.timed_out() {
                    break;
                }
            }
            *guard = false;
        }

        // Step 2: run due scheduled tasks.
        let now = Instant::now();
        loop {
            let due = {
                let mut heap = shared.scheduled.lock().unwrap();
                match heap.peek() {
                    Some(Reverse(t)) if t.due <= now => heap.pop(),
                    _ => None,
                }
            };
            match due {
                Some(Reverse(scheduled)) => (scheduled.task)(),
                None => break,
            }
        }

        // Step 3: drain a bounded slice of the FIFO queue.
        let mut ran = 0;
        while ran < MAX_TASKS_PER_ITERATION {
            match shared.immediate.pop() {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }

        // Shutdown check: once past the hard deadline with the quiet
        // period elapsed and nothing left to run, terminate.
        if shared.shutting_down.load(Ordering::Acquire) {
            let hard = *shared.hard_deadline.lock().unwrap();
            let quiet = *shared.quiet_until.lock().unwrap();
            let now = Instant::now();
            let past_hard = hard.map(|d| now >= d).unwrap_or(false);
            let past_quiet_and_idle = quiet.map(|d| now >= d).unwrap_or(true)
                && shared.immediate.is_empty()
                && shared.scheduled.lock().unwrap().is_empty();
            if past_hard || past_quiet_and_idle {
                shared.terminated.store(true, Ordering::Release);
                return;
            }
        }
    }
}

impl EventLoop for SingleThreadEventLoop {
    fn execute(&self, task: Task) {
        self.shared.immediate.push(task);
        self.notify();
    }

    fn schedule(&self, task: Task, delay: Duration) {
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        let scheduled = ScheduledTask {
            due: Instant::now() + delay,
            sequence,
            task,
        };
        self.shared
            .scheduled
            .lock()
            .unwrap()
            .push(Reverse(scheduled));
        self.notify();
    }

    fn in_event_loop(&self) -> bool {
        thread::current().id() == self.owner_thread
    }

    fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> crate::future::ChannelFuture<()> {
        let now = Instant::now();
        *self.shared.quiet_until.lock().unwrap() = Some(now + quiet_period);
        *self.shared.hard_deadline.lock().unwrap() = Some(now + timeout);
        self.shared.shutting_down.store(true, Ordering::Release);
        self.notify();

        let promise: Promise<()> = Promise::new();
        let future = promise.future();
        let shared = Arc::clone(&self.shared);
        // Poll for termination from a watcher thread rather than the loop
        // itself, since the loop thread is the one terminating.
        thread::spawn(move || {
            while !shared.terminated.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(5));
            }
            let _ = promise.try_success(());
        });
        future
    }
}

impl Drop for SingleThreadEventLoop {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.notify();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_fifo() {
        let loop_ = SingleThreadEventLoop::spawn("test-loop");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            loop_.execute(Box::new(move || order.lock().unwrap().push(i)));
        }
        // give the loop a moment to drain
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn in_event_loop_is_true_only_on_owned_thread() {
        let loop_ = SingleThreadEventLoop::spawn("test-loop-2");
        assert!(!loop_.in_event_loop());
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = Arc::clone(&seen);
        let loop_2 = Arc::clone(&loop_);
        loop_.execute(Box::new(move || {
            seen2.store(loop_2.in_event_loop(), Ordering::SeqCst);
        }));
        thread::sleep(Duration::from_millis(50));
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn scheduled_task_runs_after_delay() {
        let loop_ = SingleThreadEventLoop::spawn("test-loop-3");
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        loop_.schedule(Box::new(move || ran2.store(true, Ordering::SeqCst)), Duration::from_millis(10));
        assert!(!ran.load(Ordering::SeqCst));
        thread::sleep(Duration::from_millis(80));
        assert!(ran.load(Ordering::SeqCst));
    }
}
