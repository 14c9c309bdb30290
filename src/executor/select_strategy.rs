//! The blocking/non-blocking decision an event loop makes before polling
//! its selector (spec §4.1, step 1 of each iteration).

/// What the loop should do before processing I/O readiness this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStrategy {
    /// Block in the selector until an event arrives or it is woken.
    Select,
    /// Skip the selector this iteration and immediately continue (used
    /// when the loop knows there is pending work, e.g. a non-empty task
    /// queue, and wants to avoid the syscall).
    Continue,
    /// A non-negative hint: the caller believes there are approximately
    /// this many ready events already known, so poll non-blockingly.
    Busy(usize),
}

impl SelectStrategy {
    /// The default policy: block only when the task queue is observed
    /// empty, otherwise avoid blocking so pending tasks get a chance to
    /// run promptly.
    pub fn default_for_pending_tasks(pending_tasks: usize) -> Self {
        if pending_tasks == 0 {
            SelectStrategy::Select
        } else {
            SelectStrategy::Busy(pending_tasks)
        }
    }
}
