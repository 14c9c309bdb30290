//! The channel lifecycle state machine (spec §4.4).

use std::sync::atomic::{AtomicU8, Ordering};

/// One of the five lifecycle states a channel passes through. `Closed` is
/// absorbing; every other transition is one-way except the
/// `Registered <-> Unregistered` / `Inactive -> Unregistered` round trip a
/// re-registerable channel can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unregistered,
    Registered,
    Active,
    Inactive,
    Closed,
}

impl ChannelState {
    fn to_u8(self) -> u8 {
        match self {
            ChannelState::Unregistered => 0,
            ChannelState::Registered => 1,
            ChannelState::Active => 2,
            ChannelState::Inactive => 3,
            ChannelState::Closed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Unregistered,
            1 => ChannelState::Registered,
            2 => ChannelState::Active,
            3 => ChannelState::Inactive,
            _ => ChannelState::Closed,
        }
    }

    /// Whether `self -> next` is one of the table rows in spec §4.4.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Unregistered, Registered)
                | (Registered, Active)
                | (Registered, Unregistered)
                | (Active, Inactive)
                | (Inactive, Unregistered)
                | (Unregistered, Closed)
        )
    }
}

/// An atomically-readable slot holding the current lifecycle state, so
/// `is_active`/`is_open` queries from any thread never take a lock (spec
/// §4.4's events are executor-confined, but *reading* the state is not).
pub struct StateCell {
    raw: AtomicU8,
}

impl StateCell {
    /// Starts in [`ChannelState::Unregistered`].
    pub fn new() -> Self {
        Self {
            raw: AtomicU8::new(ChannelState::Unregistered.to_u8()),
        }
    }

    /// The current state.
    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Attempts the transition `current -> next`, failing if it is not in
    /// the permitted table (spec §4.4). Returns the state actually ending
    /// up in the cell either way the caller can compare against `next` to
    /// tell success from rejection, since a concurrent reader should never
    /// observe a transition this cell itself did not perform.
    pub fn transition(&self, next: ChannelState) -> Result<(), ChannelState> {
        let current = self.get();
        if !current.can_transition_to(next) {
            return Err(current);
        }
        self.raw.store(next.to_u8(), Ordering::Release);
        Ok(())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_documented_transition_table() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ChannelState::Unregistered);
        cell.transition(ChannelState::Registered).unwrap();
        cell.transition(ChannelState::Active).unwrap();
        cell.transition(ChannelState::Inactive).unwrap();
        cell.transition(ChannelState::Unregistered).unwrap();
        cell.transition(ChannelState::Closed).unwrap();
        assert_eq!(cell.get(), ChannelState::Closed);
    }

    #[test]
    fn rejects_skipping_states() {
        let cell = StateCell::new();
        assert!(cell.transition(ChannelState::Active).is_err());
        assert_eq!(cell.get(), ChannelState::Unregistered);
    }

    #[test]
    fn closed_is_absorbing() {
        let cell = StateCell::new();
        cell.transition(ChannelState::Registered).unwrap();
        cell.transition(ChannelState::Unregistered).unwrap();
        cell.transition(ChannelState::Closed).unwrap();
        assert!(cell.transition(ChannelState::Registered).is_err());
    }
}
