//! Wraps another allocator to keep draining across a half-close (spec §4.7
//! "streaming variant"): a TCP-style half-close means the peer will send no
//! more data, but whatever it already queued on the wire may still be
//! waiting to be read, so the wrapped predicate stays `true` until that
//! backlog is confirmed drained by an EOF read.

use super::{RecvByteBufAllocator, RecvByteBufAllocatorHandle};

/// Wraps `A` so that, once [`RecvByteBufAllocatorHandle::notify_half_close`]
/// has been called, `continue_reading` keeps returning `true` (up to the
/// message cap) regardless of the inner predictor's fill-status verdict,
/// until the inner handle itself observes EOF.
pub struct StreamingRecvByteBufAllocator<A> {
    inner: A,
}

impl<A: RecvByteBufAllocator> StreamingRecvByteBufAllocator<A> {
    /// Wraps `inner`, adding half-close-aware continuation.
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl<A: RecvByteBufAllocator> RecvByteBufAllocator for StreamingRecvByteBufAllocator<A> {
    fn new_handle(&self) -> Box<dyn RecvByteBufAllocatorHandle> {
        Box::new(Handle {
            inner: self.inner.new_handle(),
            half_close_received: false,
            eof_seen: false,
        })
    }
}

struct Handle {
    inner: Box<dyn RecvByteBufAllocatorHandle>,
    half_close_received: bool,
    eof_seen: bool,
}

impl RecvByteBufAllocatorHandle for Handle {
    fn guess(&self) -> usize {
        self.inner.guess()
    }

    fn attempted_bytes_read(&mut self, bytes: usize) {
        self.inner.attempted_bytes_read(bytes);
    }

    fn last_bytes_read(&mut self, bytes: Option<usize>) {
        self.eof_seen = bytes.is_none();
        self.inner.last_bytes_read(bytes);
    }

    fn total_bytes_read(&self) -> usize {
        self.inner.total_bytes_read()
    }

    fn continue_reading(&self, max_messages_per_read: u32, messages_read: u32) -> bool {
        if self.eof_seen {
            return false;
        }
        if messages_read >= max_messages_per_read {
            return false;
        }
        self.half_close_received || self.inner.continue_reading(max_messages_per_read, messages_read)
    }

    fn reset(&mut self) {
        self.half_close_received = false;
        self.eof_seen = false;
        self.inner.reset();
    }

    fn notify_half_close(&mut self) {
        self.half_close_received = true;
        self.inner.notify_half_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recv::FixedRecvByteBufAllocator;

    #[test]
    fn keeps_draining_after_half_close_until_eof() {
        let allocator = StreamingRecvByteBufAllocator::new(FixedRecvByteBufAllocator::new(64));
        let mut handle = allocator.new_handle();

        handle.attempted_bytes_read(64);
        handle.last_bytes_read(Some(10)); // underfilled: inner alone would stop here
        assert!(!handle.continue_reading(16, 1));

        handle.notify_half_close();
        assert!(
            handle.continue_reading(16, 1),
            "half-close keeps the loop draining the remaining backlog"
        );

        handle.attempted_bytes_read(64);
        handle.last_bytes_read(None); // backlog drained
        assert!(!handle.continue_reading(16, 2));
    }

    #[test]
    fn without_half_close_behaves_like_the_inner_allocator() {
        let allocator = StreamingRecvByteBufAllocator::new(FixedRecvByteBufAllocator::new(64));
        let mut handle = allocator.new_handle();
        handle.attempted_bytes_read(64);
        handle.last_bytes_read(Some(10));
        assert!(!handle.continue_reading(16, 1));
    }
}
