#![cfg(loom)]

//! Exhaustive-interleaving check of the refcount CAS loop (spec §8 "Refcount
//! law"): mirrors `buffer::refcount::RefCountState::retain`/`release` with
//! loom's atomics, since loom requires its own atomic types rather than
//! `std::sync::atomic` ones. Run with:
//! `RUSTFLAGS="--cfg loom" cargo test --test loom_concurrency --release --features loom-model`

use loom::sync::atomic::{AtomicIsize, Ordering};
use loom::sync::Arc;
use loom::thread;

struct LoomRefCount {
    count: AtomicIsize,
}

impl LoomRefCount {
    fn new() -> Self {
        Self {
            count: AtomicIsize::new(1),
        }
    }

    fn retain(&self, increment: isize) -> Option<isize> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return None;
            }
            let next = current + increment;
            match self
                .count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(next),
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self, decrement: isize) -> Option<bool> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current < decrement {
                return None;
            }
            let next = current - decrement;
            match self
                .count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(next == 0),
                Err(observed) => current = observed,
            }
        }
    }
}

#[test]
fn concurrent_retain_and_release_reach_zero_exactly_once() {
    loom::model(|| {
        let state = Arc::new(LoomRefCount::new());
        state.retain(1).unwrap(); // count = 2, one release per thread below

        let a = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.release(1).unwrap())
        };
        let b = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.release(1).unwrap())
        };

        let a_reached_zero = a.join().unwrap();
        let b_reached_zero = b.join().unwrap();

        assert!(
            a_reached_zero ^ b_reached_zero,
            "exactly one of the two racing releases must observe the count reaching zero"
        );
    });
}
