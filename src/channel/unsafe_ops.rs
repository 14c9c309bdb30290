//! The hidden capability set callable only from I/O-driving code, never
//! from handlers or application code (spec §9 "`Unsafe` inner contract").

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::error::CoreResult;

/// The low-level operations a transport backend implements and the event
/// loop drives directly; never exported from the crate root, matching
/// Netty's package-private `Channel.Unsafe`.
pub(crate) trait ChannelUnsafe: Send + Sync {
    /// Binds to a local address.
    fn bind(&self, local: SocketAddr) -> CoreResult<()>;

    /// Initiates a connection to a remote address.
    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> CoreResult<()>;

    /// Performs a vectored write of `buffers`, returning the number of
    /// bytes actually written (which may be less than the total, or zero
    /// if the transport would block).
    fn write(&self, buffers: &[&[u8]]) -> CoreResult<usize>;

    /// Attempts to read up to `buf.len()` bytes into `buf`, sized by the
    /// channel's recv-allocator guess (spec §4.7). `Ok(Some(n))` reports
    /// `n` bytes actually read (`Some(0)` meaning the transport would
    /// block, nothing available this attempt); `Ok(None)` means the peer
    /// has reached EOF.
    fn read(&self, buf: &mut [u8]) -> CoreResult<Option<usize>>;

    /// Accepts one pending child connection, for a listening channel's
    /// `Unsafe`. Channels that never listen (e.g. [`LoopbackUnsafe`]) just
    /// report nothing pending.
    fn accept(&self) -> CoreResult<Option<Box<dyn ChannelUnsafe>>> {
        Ok(None)
    }

    /// Closes the underlying resource. Idempotent.
    fn close(&self);

    /// Downcasting hook so tests can reach a concrete `Unsafe` (e.g.
    /// [`LoopbackUnsafe::queue_readable`]) through the trait object.
    #[cfg(test)]
    fn as_any(&self) -> &dyn std::any::Any;
}

/// An in-memory [`ChannelUnsafe`] with no real transport underneath: writes
/// are captured into a queue instead of going anywhere, and reads drain a
/// queue that tests feed via [`LoopbackUnsafe::queue_readable`]/
/// [`LoopbackUnsafe::signal_eof`]. This is the core's own `EmbeddedChannel`
/// equivalent, used by [`super::Channel::new_embedded`] and by this crate's
/// integration tests to exercise pipeline and outbound-buffer behavior
/// without a socket.
pub(crate) struct LoopbackUnsafe {
    written: parking_lot::Mutex<Vec<u8>>,
    readable: parking_lot::Mutex<VecDeque<u8>>,
    eof: std::sync::atomic::AtomicBool,
}

impl LoopbackUnsafe {
    pub(crate) fn new() -> Self {
        Self {
            written: parking_lot::Mutex::new(Vec::new()),
            readable: parking_lot::Mutex::new(VecDeque::new()),
            eof: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Drains everything written so far, for test assertions.
    #[cfg(test)]
    pub(crate) fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.written.lock())
    }

    /// Queues `data` to be returned by future `read` calls, as if the peer
    /// had sent it.
    #[cfg(test)]
    pub(crate) fn queue_readable(&self, data: &[u8]) {
        self.readable.lock().extend(data.iter().copied());
    }

    /// Marks the loopback as having reached EOF once the queued bytes are
    /// drained.
    #[cfg(test)]
    pub(crate) fn signal_eof(&self) {
        self.eof.store(true, std::sync::atomic::Ordering::Release);
    }
}

impl ChannelUnsafe for LoopbackUnsafe {
    fn bind(&self, _local: SocketAddr) -> CoreResult<()> {
        Ok(())
    }

    fn connect(&self, _remote: SocketAddr, _local: Option<SocketAddr>) -> CoreResult<()> {
        Ok(())
    }

    fn write(&self, buffers: &[&[u8]]) -> CoreResult<usize> {
        let mut written = self.written.lock();
        let mut total = 0;
        for buf in buffers {
            written.extend_from_slice(buf);
            total += buf.len();
        }
        Ok(total)
    }

    fn read(&self, buf: &mut [u8]) -> CoreResult<Option<usize>> {
        let mut readable = self.readable.lock();
        if readable.is_empty() {
            if self.eof.load(std::sync::atomic::Ordering::Acquire) {
                return Ok(None);
            }
            return Ok(Some(0));
        }
        let n = buf.len().min(readable.len());
        for slot in buf.iter_mut().take(n) {
            *slot = readable.pop_front().expect("checked non-empty above");
        }
        Ok(Some(n))
    }

    fn close(&self) {}

    #[cfg(test)]
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_captures_vectored_writes_in_order() {
        let unsafe_ops = LoopbackUnsafe::new();
        let written = unsafe_ops.write(&[b"ab", b"cd"]).unwrap();
        assert_eq!(written, 4);
        assert_eq!(unsafe_ops.take_written(), b"abcd");
    }

    #[test]
    fn read_drains_queued_bytes_then_blocks_then_eofs() {
        let unsafe_ops = LoopbackUnsafe::new();
        unsafe_ops.queue_readable(b"hi");

        let mut buf = [0u8; 8];
        assert_eq!(unsafe_ops.read(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf[..2], b"hi");

        assert_eq!(unsafe_ops.read(&mut buf).unwrap(), Some(0));

        unsafe_ops.signal_eof();
        assert_eq!(unsafe_ops.read(&mut buf).unwrap(), None);
    }
}
