//! A contiguous, heap-backed byte buffer with independent reader/writer
//! indices, a capacity, and a maximum capacity (spec §3 "Buffer").

use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};
use parking_lot::{Mutex, MutexGuard};

use crate::error::CoreError;

use super::refcount::{RefCountState, RefCounted};

struct Inner {
    data: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
    max_capacity: usize,
}

/// A reference-counted, growable byte buffer. Growth follows the
/// allocator's power-of-two policy (see [`super::allocator`]); writes past
/// `max_capacity` fail with [`CoreError::CapacityExceeded`].
///
/// Mutating operations lock an internal mutex rather than requiring `&mut
/// self`, because buffers are commonly held behind `Arc` while they travel
/// through the pipeline (spec §3 "a message passed into `write` transfers
/// ownership to the outbound buffer"); the pipeline's single-owner
/// convention means contention here is the uncommon case, not the hot
/// path.
pub struct ByteBuf {
    refcount: RefCountState,
    inner: Mutex<Inner>,
}

impl ByteBuf {
    /// Creates an empty buffer with `initial_capacity` bytes preallocated
    /// and a hard ceiling of `max_capacity`.
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        assert!(
            initial_capacity <= max_capacity,
            "initial_capacity must not exceed max_capacity"
        );
        Self {
            refcount: RefCountState::new(),
            inner: Mutex::new(Inner {
                data: Vec::with_capacity(initial_capacity),
                reader_index: 0,
                writer_index: 0,
                max_capacity,
            }),
        }
    }

    /// Wraps existing bytes as an already-written buffer (reader at 0,
    /// writer at the end), useful for constructing test fixtures or
    /// wrapping data read off the wire.
    pub fn from_vec(data: Vec<u8>, max_capacity: usize) -> Self {
        let writer_index = data.len();
        assert!(writer_index <= max_capacity);
        Self {
            refcount: RefCountState::new(),
            inner: Mutex::new(Inner {
                data,
                reader_index: 0,
                writer_index,
                max_capacity,
            }),
        }
    }

    /// Total allocated capacity right now (not the ceiling).
    pub fn capacity(&self) -> usize {
        self.inner.lock().data.capacity()
    }

    /// The hard ceiling this buffer will never grow past.
    pub fn max_capacity(&self) -> usize {
        self.inner.lock().max_capacity
    }

    /// Bytes available to read: `writer_index - reader_index`.
    pub fn readable_bytes(&self) -> usize {
        let inner = self.inner.lock();
        inner.writer_index - inner.reader_index
    }

    /// Bytes that can still be written before hitting `max_capacity`.
    pub fn writable_bytes(&self) -> usize {
        let inner = self.inner.lock();
        inner.max_capacity - inner.writer_index
    }

    /// The current reader index.
    pub fn reader_index(&self) -> usize {
        self.inner.lock().reader_index
    }

    /// The current writer index.
    pub fn writer_index(&self) -> usize {
        self.inner.lock().writer_index
    }

    /// Runs `f` against the currently readable slice without copying.
    pub fn with_readable<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.data[inner.reader_index..inner.writer_index])
    }

    /// Advances the reader index by `len` bytes, as if that many bytes had
    /// been consumed.
    pub fn advance_reader(&self, len: usize) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        let readable = inner.writer_index - inner.reader_index;
        if len > readable {
            return Err(CoreError::capacity_exceeded(len, readable));
        }
        inner.reader_index += len;
        Ok(())
    }

    /// A [`bytes::Buf`] view over the currently readable region, for
    /// handing this buffer to code written against the `bytes` ecosystem
    /// (e.g. a vectored writer or a codec) instead of this crate's own
    /// `with_readable`/`advance_reader` pair.
    pub fn reader(&self) -> ByteBufReader<'_> {
        ByteBufReader {
            inner: self.inner.lock(),
        }
    }

    /// A [`bytes::BufMut`] view over the remaining writable region, up to
    /// `max_capacity`, growing on demand per [`super::allocator`]'s
    /// power-of-two policy.
    pub fn writer(&self) -> ByteBufWriter<'_> {
        ByteBufWriter {
            inner: self.inner.lock(),
        }
    }

    /// Appends `src` to the buffer, growing per [`super::allocator`]'s
    /// power-of-two policy if there isn't enough room, and failing with
    /// [`CoreError::CapacityExceeded`] if `max_capacity` would be exceeded.
    /// The actual copy is performed through the [`bytes::BufMut`] bridge
    /// (`writer()`) after growing the backing storage so the bridge's
    /// `chunk_mut` call lands in a single pass.
    pub fn write_slice(&self, src: &[u8]) -> Result<(), CoreError> {
        {
            let mut inner = self.inner.lock();
            let needed_end = inner
                .writer_index
                .checked_add(src.len())
                .ok_or_else(|| CoreError::capacity_exceeded(src.len(), inner.max_capacity))?;
            if needed_end > inner.max_capacity {
                return Err(CoreError::capacity_exceeded(needed_end, inner.max_capacity));
            }
            if needed_end > inner.data.len() {
                let grown = super::allocator::next_capacity(needed_end, inner.max_capacity);
                inner.data.resize(grown.max(needed_end), 0);
            }
        }
        self.writer().put_slice(src);
        Ok(())
    }

    /// Resets both indices to zero, keeping the allocated capacity. Used
    /// by pooled allocators when a buffer is returned for reuse.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.reader_index = 0;
        inner.writer_index = 0;
    }
}

/// A [`bytes::Buf`] borrowing a [`ByteBuf`]'s readable region for the
/// duration of the guard (spec §4.3 "Buffer" bridged onto the `bytes`
/// crate's reader contract, matching the teacher's `Readable`/`bytes::Buf`
/// bridge).
pub struct ByteBufReader<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl<'a> Buf for ByteBufReader<'a> {
    fn remaining(&self) -> usize {
        self.inner.writer_index - self.inner.reader_index
    }

    fn chunk(&self) -> &[u8] {
        &self.inner.data[self.inner.reader_index..self.inner.writer_index]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.remaining(), "advance past readable bytes");
        self.inner.reader_index += cnt;
    }
}

/// A [`bytes::BufMut`] borrowing a [`ByteBuf`]'s writable region for the
/// duration of the guard, growing the backing storage on demand the same
/// way [`ByteBuf::write_slice`] does.
pub struct ByteBufWriter<'a> {
    inner: MutexGuard<'a, Inner>,
}

// SAFETY: `chunk_mut` only ever exposes bytes already present (and
// zero-initialized) in `inner.data`, grown just-in-time by `reserve`/
// `resize` before the slice is handed out; `advance_mut` only moves
// `writer_index` forward by at most the length of the slice most recently
// returned from `chunk_mut`, matching `BufMut`'s invariants.
unsafe impl<'a> BufMut for ByteBufWriter<'a> {
    fn remaining_mut(&self) -> usize {
        self.inner.max_capacity - self.inner.writer_index
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        let new_writer_index = self.inner.writer_index + cnt;
        assert!(
            new_writer_index <= self.inner.data.len(),
            "advance_mut past the slice returned by chunk_mut"
        );
        self.inner.writer_index = new_writer_index;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        let inner = &mut *self.inner;
        if inner.data.len() < inner.max_capacity {
            let grown =
                super::allocator::next_capacity(inner.writer_index + 1, inner.max_capacity);
            let current_len = inner.data.len();
            if grown > current_len {
                inner.data.resize(grown, 0);
            }
        }
        let writer_index = inner.writer_index;
        UninitSlice::new(&mut inner.data[writer_index..])
    }
}

impl RefCounted for ByteBuf {
    fn ref_count(&self) -> isize {
        self.refcount.current()
    }

    fn retain(&self, increment: usize) -> Result<isize, CoreError> {
        self.refcount.retain(increment)
    }

    fn release(&self, decrement: usize) -> Result<bool, CoreError> {
        self.refcount.release(decrement)
    }
}

impl super::Duplicate for ByteBuf {
    /// Produces an independent copy with its own storage and a fresh
    /// refcount starting at 1. A true zero-copy "retained slice" would
    /// need a view type sharing the parent's backing `Vec`; this crate
    /// keeps duplication simple (copy the readable region) since group
    /// broadcast is the only caller and correctness, not an extra copy,
    /// is what matters there.
    fn duplicate(&self) -> Self {
        let copy = self.with_readable(|s| s.to_vec());
        ByteBuf::from_vec(copy, self.max_capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let buf = ByteBuf::new(16, 1024);
        buf.write_slice(b"hello").unwrap();
        assert_eq!(buf.readable_bytes(), 5);
        buf.with_readable(|s| assert_eq!(s, b"hello"));
        buf.advance_reader(5).unwrap();
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn write_past_max_capacity_fails() {
        let buf = ByteBuf::new(4, 8);
        assert!(buf.write_slice(&[0u8; 9]).is_err());
    }

    #[test]
    fn advance_reader_past_writer_fails() {
        let buf = ByteBuf::new(4, 8);
        buf.write_slice(b"ab").unwrap();
        assert!(buf.advance_reader(3).is_err());
    }

    #[test]
    fn reader_and_writer_bridge_to_the_bytes_crate() {
        let buf = ByteBuf::new(4, 32);
        {
            let mut writer = buf.writer();
            assert_eq!(writer.remaining_mut(), 32);
            writer.put_slice(b"abcd");
            writer.put_u8(b'!');
        }
        let mut reader = buf.reader();
        assert_eq!(reader.remaining(), 5);
        let mut out = [0u8; 5];
        reader.copy_to_slice(&mut out);
        assert_eq!(&out, b"abcd!");
        assert_eq!(reader.remaining(), 0);
    }
}
