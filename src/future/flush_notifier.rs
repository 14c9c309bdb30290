//! Accepts `(promise, pending_bytes)` pairs and advances a monotonically
//! increasing write counter; each promise completes once the counter
//! reaches its checkpoint (spec §4.2 "flush notifier").

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::future::Promise;

struct Checkpoint {
    promise: Promise<()>,
    threshold: u64,
}

/// Tracks how many bytes of a flush have actually been written and
/// completes each staged promise once the running total reaches the
/// promise's checkpoint. Rebases when the counter would overflow, so a
/// long-lived channel never wraps `u64`.
pub struct FlushNotifier {
    state: Mutex<State>,
}

struct State {
    written: u64,
    checkpoints: VecDeque<Checkpoint>,
}

/// Above this many written bytes, [`FlushNotifier`] rebases its internal
/// counter and every pending checkpoint down to zero, preserving their
/// relative offsets. Chosen so rebasing is rare in practice while still
/// leaving headroom below `u64::MAX`.
const REBASE_THRESHOLD: u64 = u64::MAX / 2;

impl FlushNotifier {
    /// Creates a notifier with its write counter at zero.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                written: 0,
                checkpoints: VecDeque::new(),
            }),
        }
    }

    /// Registers `promise` to complete once `pending_bytes` more bytes have
    /// been reported written from this call onward.
    pub fn add(&self, promise: Promise<()>, pending_bytes: u64) {
        let mut state = self.state.lock();
        let base = state
            .checkpoints
            .back()
            .map(|c| c.threshold)
            .unwrap_or(state.written);
        let threshold = base + pending_bytes;
        state.checkpoints.push_back(Checkpoint { promise, threshold });
    }

    /// Reports that `written` additional bytes have gone out on the wire,
    /// completing every checkpoint whose threshold has now been reached.
    pub fn advance(&self, written: u64) {
        let mut state = self.state.lock();
        state.written += written;
        while let Some(front) = state.checkpoints.front() {
            if state.written >= front.threshold {
                let checkpoint = state.checkpoints.pop_front().unwrap();
                checkpoint.promise.try_success(());
            } else {
                break;
            }
        }
        if state.written >= REBASE_THRESHOLD {
            let base = state.written;
            for checkpoint in state.checkpoints.iter_mut() {
                checkpoint.threshold = checkpoint.threshold.saturating_sub(base);
            }
            state.written = 0;
        }
    }
}

impl Default for FlushNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoints_complete_in_order_as_bytes_advance() {
        let notifier = FlushNotifier::new();
        let p1: Promise<()> = Promise::new();
        let p2: Promise<()> = Promise::new();
        notifier.add(p1.clone(), 100);
        notifier.add(p2.clone(), 50);

        notifier.advance(80);
        assert!(p1.is_pending());
        assert!(p2.is_pending());

        notifier.advance(20); // total 100, reaches p1's checkpoint
        assert!(!p1.is_pending());
        assert!(p2.is_pending());

        notifier.advance(50); // total 150, reaches p2's checkpoint
        assert!(!p2.is_pending());
    }

    #[test]
    fn rebase_preserves_relative_offsets() {
        let notifier = FlushNotifier::new();
        let p: Promise<()> = Promise::new();
        {
            let mut state = notifier.state.lock();
            state.written = REBASE_THRESHOLD - 10;
        }
        notifier.add(p.clone(), 100); // threshold = REBASE_THRESHOLD + 90
        notifier.advance(20); // written = REBASE_THRESHOLD + 10, triggers rebase
        assert!(p.is_pending());
        notifier.advance(80);
        assert!(!p.is_pending());
    }
}
