//! A multi-loop group that fans out new channels across its member loops
//! by simple round robin (spec §5 "Scheduling model").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::SingleThreadEventLoop;

/// A fixed-size set of event loops, each owning its own OS thread.
/// [`EventLoopGroup::next`] hands out loops in round-robin order so
/// channels registered through the group are spread evenly.
pub struct EventLoopGroup {
    loops: Vec<Arc<SingleThreadEventLoop>>,
    cursor: AtomicUsize,
}

impl EventLoopGroup {
    /// Spawns `size` event loops named `{name_prefix}-{index}`.
    pub fn new(name_prefix: &str, size: usize) -> Arc<Self> {
        assert!(size > 0, "event loop group must have at least one loop");
        let loops = (0..size)
            .map(|i| SingleThreadEventLoop::spawn(format!("{name_prefix}-{i}")))
            .collect();
        Arc::new(Self {
            loops,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the next loop in round-robin order.
    pub fn next(&self) -> Arc<SingleThreadEventLoop> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        Arc::clone(&self.loops[index])
    }

    /// The number of loops in this group.
    pub fn size(&self) -> usize {
        self.loops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_members() {
        let group = EventLoopGroup::new("rr", 3);
        let a = group.next();
        let b = group.next();
        let c = group.next();
        let d = group.next();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&b, &c));
        assert!(Arc::ptr_eq(&a, &d));
    }
}
