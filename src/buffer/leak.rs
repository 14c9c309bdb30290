//! A sampling interceptor on allocation that attaches a tracker; the
//! tracker logs if the associated refcount never reached zero before being
//! dropped. Diagnostic only — never alters behavior (spec §7, §9 "Leak
//! detection").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Samples allocations at a configurable rate and tracks whether each
/// sampled buffer was released before being dropped.
pub struct LeakDetector {
    /// Track roughly 1 in `sample_rate` allocations; `1` tracks every one.
    sample_rate: usize,
    counter: AtomicUsize,
    leaks_detected: AtomicU64,
}

impl LeakDetector {
    /// Creates a detector sampling 1 in `sample_rate` allocations.
    pub fn new(sample_rate: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            counter: AtomicUsize::new(0),
            leaks_detected: AtomicU64::new(0),
        }
    }

    /// Decides whether the next allocation should be tracked, and if so
    /// returns a [`LeakTracker`] the caller should drop alongside the
    /// buffer's own destructor (or attach to its deallocation path).
    pub fn maybe_track(&self, hint: &'static str) -> Option<LeakTracker<'_>> {
        let seen = self.counter.fetch_add(1, Ordering::Relaxed);
        if seen % self.sample_rate == 0 {
            Some(LeakTracker {
                detector: self,
                hint,
                released: false,
            })
        } else {
            None
        }
    }

    /// Total leaks observed so far, for tests and metrics export.
    pub fn leaks_detected(&self) -> u64 {
        self.leaks_detected.load(Ordering::Relaxed)
    }
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self::new(128)
    }
}

/// A per-allocation tracker. Call [`LeakTracker::mark_released`] once the
/// tracked buffer's refcount reaches zero through normal release; if the
/// tracker is dropped without that call having happened, it logs a leak
/// warning.
pub struct LeakTracker<'a> {
    detector: &'a LeakDetector,
    hint: &'static str,
    released: bool,
}

impl LeakTracker<'_> {
    /// Records that the tracked buffer was released cleanly.
    pub fn mark_released(&mut self) {
        self.released = true;
    }
}

impl Drop for LeakTracker<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.detector.leaks_detected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(hint = self.hint, "buffer dropped without reaching refcount zero");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreleased_tracker_counts_as_a_leak() {
        let detector = LeakDetector::new(1);
        {
            let _tracker = detector.maybe_track("test-buffer");
        }
        assert_eq!(detector.leaks_detected(), 1);
    }

    #[test]
    fn released_tracker_does_not_count_as_a_leak() {
        let detector = LeakDetector::new(1);
        {
            let mut tracker = detector.maybe_track("test-buffer").unwrap();
            tracker.mark_released();
        }
        assert_eq!(detector.leaks_detected(), 0);
    }

    #[test]
    fn sampling_skips_most_allocations() {
        let detector = LeakDetector::new(4);
        let mut tracked = 0;
        for _ in 0..8 {
            if detector.maybe_track("x").is_some() {
                tracked += 1;
            }
        }
        assert_eq!(tracked, 2);
    }

    #[test]
    #[tracing_test::traced_test]
    fn unreleased_tracker_warns_with_its_hint() {
        let detector = LeakDetector::new(1);
        {
            let _tracker = detector.maybe_track("socket-read-buffer");
        }
        assert!(logs_contain("buffer dropped without reaching refcount zero"));
        assert!(logs_contain("socket-read-buffer"));
    }
}
