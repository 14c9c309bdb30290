//! The reference-counted message discipline every buffer obeys while
//! traversing the pipeline (spec §3 "Message", §4.3, §7, §8 "Refcount
//! law").

use std::sync::atomic::{AtomicIsize, Ordering};

use crate::error::CoreError;

/// The atomic count shared by every reference-counted message. Starts at 1
/// (the reference the constructor itself holds). `retain`/`release` use a
/// compare-and-swap loop so exactly one caller ever observes the
/// count transition to zero, which is what lets deallocation run exactly
/// once without an extra "already freed" flag.
#[derive(Debug)]
pub struct RefCountState {
    count: AtomicIsize,
}

impl RefCountState {
    /// A fresh count, initialized to 1.
    pub fn new() -> Self {
        Self {
            count: AtomicIsize::new(1),
        }
    }

    /// The current count. Racy by construction (another thread may retain
    /// or release concurrently) — intended for diagnostics, not for
    /// deciding whether to call `retain`/`release`.
    pub fn current(&self) -> isize {
        self.count.load(Ordering::Acquire)
    }

    /// Increments the count by `increment`. Fails if the observed count is
    /// `<= 0` (resurrection from zero is forbidden) or if the increment
    /// would overflow `isize`.
    pub fn retain(&self, increment: usize) -> Result<isize, CoreError> {
        let increment = increment as isize;
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return Err(CoreError::invalid_refcount(
                    "retain observed a count <= 0 (resurrection is forbidden)",
                ));
            }
            let next = current
                .checked_add(increment)
                .ok_or_else(|| CoreError::invalid_refcount("retain would overflow the count"))?;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrements the count by `decrement`. Returns `true` iff this call
    /// drove the count to exactly zero (the caller must deallocate
    /// exactly once in that case). Fails if the decrement would take the
    /// count below zero.
    pub fn release(&self, decrement: usize) -> Result<bool, CoreError> {
        let decrement = decrement as isize;
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current < decrement {
                return Err(CoreError::invalid_refcount(
                    "release would drop the count below zero",
                ));
            }
            let next = current - decrement;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next == 0),
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for RefCountState {
    fn default() -> Self {
        Self::new()
    }
}

/// The public reference-counting contract. `retain`/`release` are wait-free
/// except for the deallocation path on the final release (spec §5
/// "Shared-resource policy").
pub trait RefCounted: Send + Sync {
    /// The current count (diagnostic only, see [`RefCountState::current`]).
    fn ref_count(&self) -> isize;

    /// Increments the count by `increment`, returning the new count.
    fn retain(&self, increment: usize) -> Result<isize, CoreError>;

    /// Decrements the count by `decrement`. Deallocates exactly once if
    /// this call drives the count to zero, and returns `true` in that
    /// case.
    fn release(&self, decrement: usize) -> Result<bool, CoreError>;

    /// Records a non-semantic trace for leak diagnostics; never alters
    /// behavior (spec §7 "Leak detection emits diagnostics asynchronously;
    /// it never alters behavior").
    fn touch(&self, hint: &'static str) {
        let _ = hint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_then_release_same_amount_is_a_no_op() {
        let state = RefCountState::new();
        assert_eq!(state.retain(3).unwrap(), 4);
        assert!(!state.release(3).unwrap());
        assert_eq!(state.current(), 1);
    }

    #[test]
    fn final_release_reaches_zero_exactly_once() {
        let state = RefCountState::new();
        assert!(state.release(1).unwrap());
        assert_eq!(state.current(), 0);
    }

    #[test]
    fn release_below_zero_is_an_error() {
        let state = RefCountState::new();
        assert!(state.release(2).is_err());
    }

    #[test]
    fn retain_from_zero_is_an_error() {
        let state = RefCountState::new();
        assert!(state.release(1).unwrap());
        assert!(state.retain(1).is_err());
    }

    proptest::proptest! {
        /// The refcount law (spec §8): for any sequence of retains and
        /// releases that never asks to drop the count below zero, the
        /// observed count always matches the running total, and exactly
        /// one release call reports reaching zero.
        #[test]
        fn retain_release_sequence_matches_a_running_total(
            ops in proptest::collection::vec(
                (proptest::bool::ANY, 1usize..=5),
                1..64,
            )
        ) {
            let state = RefCountState::new();
            let mut model: isize = 1;
            let mut zero_hits = 0u32;

            for (is_retain, amount) in ops {
                if is_retain {
                    if let Ok(new_count) = state.retain(amount) {
                        model += amount as isize;
                        assert_eq!(new_count, model);
                    }
                } else if amount as isize <= model {
                    let reached_zero = state.release(amount).unwrap();
                    model -= amount as isize;
                    assert_eq!(reached_zero, model == 0);
                    if reached_zero {
                        zero_hits += 1;
                    }
                } else {
                    assert!(state.release(amount).is_err());
                }
                if model == 0 {
                    break;
                }
            }

            assert!(zero_hits <= 1);
            assert_eq!(state.current(), model);
        }
    }
}
