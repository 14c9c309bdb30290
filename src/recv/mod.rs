//! Read-size prediction handles: fixed and adaptive (spec §4.7
//! "RecvByteBufAllocator").

mod adaptive;
mod fixed;
mod streaming;

pub use adaptive::AdaptiveRecvByteBufAllocator;
pub use fixed::FixedRecvByteBufAllocator;
pub use streaming::StreamingRecvByteBufAllocator;

/// One read-loop's worth of state for predicting how large the next buffer
/// should be, and when to stop reading.
///
/// A handle is reset before each read-complete cycle, accumulates
/// `last_bytes_read` per individual read, and is asked after each
/// individual read whether the loop should continue (spec §4.7
/// `continueReading`).
pub trait RecvByteBufAllocator: Send + Sync {
    /// Returns a fresh handle, starting a new read-complete cycle.
    fn new_handle(&self) -> Box<dyn RecvByteBufAllocatorHandle>;
}

/// The per-cycle handle itself.
pub trait RecvByteBufAllocatorHandle: Send {
    /// The buffer size this handle currently predicts for the next read.
    fn guess(&self) -> usize;

    /// Records that the handle is about to attempt a read of `bytes`
    /// capacity.
    fn attempted_bytes_read(&mut self, bytes: usize);

    /// Records how many bytes an individual read actually produced.
    /// `0` means the peer produced nothing this attempt; a negative-like
    /// sentinel (modeled here as `None`) means EOF/close observed.
    fn last_bytes_read(&mut self, bytes: Option<usize>);

    /// The total bytes read across all attempts in the current cycle.
    fn total_bytes_read(&self) -> usize;

    /// Whether the read loop should keep going for another attempt within
    /// the same read-complete cycle (spec §4.7's `continueReading`
    /// predicate: stop on EOF, stop once `attempted == last` fewer than a
    /// full buffer, stop past `MAX_MESSAGES_PER_READ`).
    fn continue_reading(&self, max_messages_per_read: u32, messages_read: u32) -> bool;

    /// Resets per-cycle counters ahead of the next read-complete.
    fn reset(&mut self);

    /// Notifies the handle that the transport signaled a half-close (the
    /// peer will send no more data, but already-buffered data may remain).
    /// Only the streaming variant ([`StreamingRecvByteBufAllocator`]) acts
    /// on this; every other handle treats it as a no-op.
    fn notify_half_close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_handle_always_guesses_the_configured_size() {
        let allocator = FixedRecvByteBufAllocator::new(2048);
        let mut handle = allocator.new_handle();
        assert_eq!(handle.guess(), 2048);
        handle.attempted_bytes_read(2048);
        handle.last_bytes_read(Some(2048));
        assert_eq!(handle.guess(), 2048);
    }
}
