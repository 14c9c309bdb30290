//! The per-channel outbound write queue (spec §4.6).
//!
//! Netty models this as a singly-linked list with three pointers
//! (`flushed`, `unflushed`, `tail`). A `VecDeque` with a `flushed_count`
//! prefix-length expresses the same three regions — `0..flushed_count` is
//! the flushed run, `flushed_count..len` is unflushed — without hand-rolled
//! pointer juggling, while preserving every invariant in spec §3
//! ("OutboundBuffer").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use crate::buffer::{ByteBuf, RefCounted};
use crate::error::{CoreError, CoreResult};
use crate::future::Promise;

use super::entry::Entry;

const WATERMARK_BIT: u32 = 1;

/// Whether a watermark-crossing call changed the channel's writability,
/// and in which direction — the signal [`crate::channel::Channel`] uses to
/// decide whether to fire a writability-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritabilityTransition {
    /// Writability did not change.
    Unchanged,
    /// Crossed the high watermark; the channel is now unwritable.
    BecameUnwritable,
    /// Dropped back to/below the low watermark; the channel is writable
    /// again (assuming no user-defined override bit is still set).
    BecameWritable,
}

struct Inner {
    entries: VecDeque<Entry>,
    flushed_count: usize,
    fail_flushed_in_progress: bool,
    closing_in_progress: bool,
    permanently_closed: bool,
}

/// The write queue itself: accounting is split between fields requiring
/// only the channel's executor thread (the entry list, region boundary)
/// and fields read/written from any thread (total pending bytes,
/// writability bits) per spec §5 "Shared-resource policy".
pub struct OutboundBuffer {
    inner: parking_lot::Mutex<Inner>,
    total_pending_bytes: AtomicI64,
    writability: AtomicU32,
    low_water_mark: usize,
    high_water_mark: usize,
}

impl OutboundBuffer {
    /// Creates an empty buffer with the given watermarks (spec §4.6
    /// invariant `0 <= low <= high`).
    pub fn new(low_water_mark: usize, high_water_mark: usize) -> Self {
        assert!(low_water_mark <= high_water_mark);
        Self {
            inner: parking_lot::Mutex::new(Inner {
                entries: VecDeque::new(),
                flushed_count: 0,
                fail_flushed_in_progress: false,
                closing_in_progress: false,
                permanently_closed: false,
            }),
            total_pending_bytes: AtomicI64::new(0),
            writability: AtomicU32::new(0),
            low_water_mark,
            high_water_mark,
        }
    }

    /// `isWritable`: true iff every bit of the writability atomic is zero.
    pub fn is_writable(&self) -> bool {
        self.writability.load(Ordering::Acquire) == 0
    }

    /// The sum of pending sizes of all non-cancelled entries right now.
    pub fn total_pending_bytes(&self) -> i64 {
        self.total_pending_bytes.load(Ordering::Acquire)
    }

    /// Sets or clears one of the 31 user-defined override bits (bits 1-31).
    /// The channel stays unwritable while *any* bit, watermark or user, is
    /// set.
    pub fn set_user_writability_bit(&self, bit: u32, writable: bool) -> WritabilityTransition {
        assert!((1..32).contains(&bit), "bit must be in 1..32");
        let mask = 1u32 << bit;
        let was_writable = self.is_writable();
        if writable {
            self.writability.fetch_and(!mask, Ordering::AcqRel);
        } else {
            self.writability.fetch_or(mask, Ordering::AcqRel);
        }
        transition(was_writable, self.is_writable())
    }

    /// `addMessage`: appends an entry to the tail (the unflushed region),
    /// returning the promise's future and any writability change.
    pub fn add_message(
        &self,
        message: Arc<ByteBuf>,
        promise: Promise<()>,
    ) -> WritabilityTransition {
        let mut inner = self.inner.lock();
        if inner.permanently_closed {
            drop(inner);
            let _ = message.release(1);
            promise.try_failure(CoreError::closed("outbound buffer"));
            return WritabilityTransition::Unchanged;
        }
        let entry = Entry::new(message, promise);
        let pending = entry.pending_size() as i64;
        inner.entries.push_back(entry);
        let was_writable = self.is_writable();
        let total = self.total_pending_bytes.fetch_add(pending, Ordering::AcqRel) + pending;
        if total as usize > self.high_water_mark {
            self.writability.fetch_or(WATERMARK_BIT, Ordering::AcqRel);
        }
        transition(was_writable, self.is_writable())
    }

    /// `addFlush`: promotes every currently-unflushed entry into the
    /// flushed region, dropping any that were cancelled in the meantime.
    pub fn add_flush(&self) {
        let mut inner = self.inner.lock();
        let len = inner.entries.len();
        let flushed_count = inner.flushed_count;
        let mut removed_pending = 0i64;
        let mut write_idx = flushed_count;
        for read_idx in flushed_count..len {
            if inner.entries[read_idx].is_cancelled() {
                removed_pending += inner.entries[read_idx].pending_size() as i64;
                continue;
            }
            if write_idx != read_idx {
                inner.entries.swap(write_idx, read_idx);
            }
            write_idx += 1;
        }
        inner.entries.truncate(write_idx);
        inner.flushed_count = inner.entries.len();
        drop(inner);
        if removed_pending > 0 {
            self.total_pending_bytes
                .fetch_sub(removed_pending, Ordering::AcqRel);
        }
    }

    /// `current()`: the flushed head's message, if any.
    pub fn current(&self) -> Option<Arc<ByteBuf>> {
        let inner = self.inner.lock();
        if inner.flushed_count == 0 {
            None
        } else {
            Some(Arc::clone(inner.entries[0].message()))
        }
    }

    /// `progress(amount)`: advances the flushed head's cumulative progress
    /// and, for a progressive write, reports `(progress, total)` (spec
    /// §4.6).
    pub fn progress(&self, amount: usize) {
        let mut inner = self.inner.lock();
        if inner.flushed_count == 0 {
            return;
        }
        let entry = &mut inner.entries[0];
        entry.progress_so_far += amount;
        tracing::trace!(
            progress = entry.progress_so_far,
            total = entry.total,
            "outbound entry progress"
        );
    }

    /// `remove()`: pops the flushed head, releasing the message (unless
    /// cancelled) and completing its promise successfully.
    pub fn remove(&self) -> CoreResult<bool> {
        self.remove_inner(None)
    }

    /// `remove(cause)`: as [`OutboundBuffer::remove`], but fails the
    /// promise with `cause` instead of succeeding it.
    pub fn remove_with_cause(&self, cause: CoreError) -> CoreResult<bool> {
        self.remove_inner(Some(cause))
    }

    fn remove_inner(&self, cause: Option<CoreError>) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.flushed_count == 0 {
            return Ok(false);
        }
        let entry = inner.entries.pop_front().expect("flushed_count > 0");
        inner.flushed_count -= 1;
        drop(inner);

        if !entry.is_cancelled() {
            entry.message().release(1)?;
        }
        match cause {
            Some(cause) => {
                entry.promise.try_failure(cause);
            }
            None => {
                entry.promise.try_success(());
            }
        }

        let was_writable = self.is_writable();
        let total = self
            .total_pending_bytes
            .fetch_sub(entry.pending_size() as i64, Ordering::AcqRel)
            - entry.pending_size() as i64;
        if total as usize <= self.low_water_mark {
            self.writability.fetch_and(!WATERMARK_BIT, Ordering::AcqRel);
        }
        Ok(was_writable != self.is_writable())
    }

    /// `removeBytes(written)`: consumes whole flushed entries and partially
    /// advances the next one's reader index, reporting `progress` on each
    /// as it goes. Postcondition: the full `written` count is consumed.
    pub fn remove_bytes(&self, mut written: usize) -> CoreResult<()> {
        while written > 0 {
            let readable = match self.current() {
                Some(buf) => buf.readable_bytes(),
                None => break,
            };
            if readable == 0 {
                self.remove()?;
                continue;
            }
            if written >= readable {
                if let Some(buf) = self.current() {
                    buf.advance_reader(readable)?;
                }
                self.progress(readable);
                written -= readable;
                self.remove()?;
            } else {
                if let Some(buf) = self.current() {
                    buf.advance_reader(written)?;
                }
                self.progress(written);
                written = 0;
            }
        }
        Ok(())
    }

    /// `nioBuffers(maxCount, maxBytes)`: readable slices of the flushed
    /// entries, stopping once `maxCount` is reached or `maxBytes` is spent.
    /// The first slice is always admitted in full regardless of its size
    /// (so a single oversized entry still makes progress); once budget
    /// remains too small to fit the next entry whole, that entry is
    /// truncated to the remaining budget and no further entries are
    /// considered. Runs `f` against the assembled view instead of
    /// returning borrowed slices directly, since the entries live behind
    /// a lock.
    pub fn with_nio_buffers<R>(
        &self,
        max_count: usize,
        max_bytes: usize,
        f: impl FnOnce(&[&[u8]]) -> R,
    ) -> R {
        let inner = self.inner.lock();
        let mut owned: Vec<Vec<u8>> = Vec::new();
        let mut cumulative = 0usize;
        for idx in 0..inner.flushed_count {
            if owned.len() >= max_count {
                break;
            }
            let mut slice = inner.entries[idx].message().with_readable(|s| s.to_vec());
            let mut stop_after = false;
            if !owned.is_empty() {
                let remaining = max_bytes.saturating_sub(cumulative);
                if remaining == 0 {
                    break;
                }
                if slice.len() > remaining {
                    slice.truncate(remaining);
                    stop_after = true;
                }
            }
            cumulative += slice.len();
            owned.push(slice);
            if stop_after {
                break;
            }
        }
        let refs: Vec<&[u8]> = owned.iter().map(|v| v.as_slice()).collect();
        f(&refs)
    }

    /// `failFlushed(cause, notify)`: fails every flushed entry in turn.
    /// Re-entrant calls made while one is already in progress are ignored.
    pub fn fail_flushed(&self, cause: CoreError) -> CoreResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.fail_flushed_in_progress {
                return Ok(());
            }
            inner.fail_flushed_in_progress = true;
        }
        let result = (|| {
            loop {
                let has_flushed = self.inner.lock().flushed_count > 0;
                if !has_flushed {
                    break;
                }
                self.remove_with_cause(cause.duplicate())?;
            }
            Ok(())
        })();
        self.inner.lock().fail_flushed_in_progress = false;
        result
    }

    /// `close(cause, allowOpenChannel)`: releases and fails every remaining
    /// unflushed entry, clearing the flushed/unflushed boundary with it.
    /// Precondition: no flushed entries remain (callers drain via
    /// [`OutboundBuffer::fail_flushed`] first) — if a listener fired by
    /// that drain (or by this call itself) re-enters `close` before this
    /// call returns, the re-entrant call is absorbed by invoking
    /// `reschedule` instead of re-entering the entry list, so the caller
    /// can run it again from the executor once the current call stack has
    /// unwound. `allow_open_channel` controls whether the buffer still
    /// accepts writes afterward (`true`, e.g. a half-close) or permanently
    /// rejects further `add_message` calls with `CoreError::Closed`
    /// (`false`, the ordinary full-close path).
    pub fn close(
        &self,
        cause: CoreError,
        allow_open_channel: bool,
        reschedule: impl FnOnce(),
    ) -> CoreResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closing_in_progress {
                drop(inner);
                reschedule();
                return Ok(());
            }
            inner.closing_in_progress = true;
        }

        let result = (|| -> CoreResult<()> {
            let remaining: Vec<Entry> = {
                let mut inner = self.inner.lock();
                assert_eq!(
                    inner.flushed_count, 0,
                    "close requires flushed entries already drained"
                );
                inner.entries.drain(..).collect()
            };
            let mut freed = 0i64;
            for entry in remaining {
                if !entry.is_cancelled() {
                    entry.message().release(1)?;
                }
                entry.promise.try_failure(cause.duplicate());
                freed += entry.pending_size() as i64;
            }
            self.total_pending_bytes.fetch_sub(freed, Ordering::AcqRel);
            Ok(())
        })();

        let mut inner = self.inner.lock();
        inner.closing_in_progress = false;
        if !allow_open_channel {
            inner.permanently_closed = true;
        }
        result
    }

    /// Cancels the unflushed entry holding `message`, if it is still
    /// unflushed — a write cancelled before `addFlush` is dropped entirely
    /// (bytes freed, message released) rather than attempted (spec §5
    /// "Cancellation and timeouts").
    pub fn cancel_unflushed(&self, promise: &Promise<()>) -> bool {
        let cancel_requested = promise.cancel();
        if !cancel_requested {
            return false;
        }
        let mut inner = self.inner.lock();
        let flushed_count = inner.flushed_count;
        for entry in inner.entries.iter_mut().skip(flushed_count) {
            if entry.promise.shares_slot_with(promise) {
                entry.cancel();
                return true;
            }
        }
        true
    }
}

fn transition(was_writable: bool, is_writable: bool) -> WritabilityTransition {
    match (was_writable, is_writable) {
        (true, false) => WritabilityTransition::BecameUnwritable,
        (false, true) => WritabilityTransition::BecameWritable,
        _ => WritabilityTransition::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_with(bytes: &[u8]) -> Arc<ByteBuf> {
        let buf = Arc::new(ByteBuf::new(bytes.len(), bytes.len() * 2));
        buf.write_slice(bytes).unwrap();
        buf
    }

    #[test]
    fn crossing_high_watermark_reports_unwritable() {
        let outbound = OutboundBuffer::new(8, 16);
        let transition = outbound.add_message(buf_with(&[0u8; 32]), Promise::new());
        assert_eq!(transition, WritabilityTransition::BecameUnwritable);
        assert!(!outbound.is_writable());
    }

    #[test]
    fn remove_below_low_watermark_reports_writable_again() {
        let outbound = OutboundBuffer::new(8, 16);
        outbound.add_message(buf_with(&[0u8; 32]), Promise::new());
        outbound.add_flush();
        let transition = outbound.remove().unwrap();
        assert!(transition);
        assert!(outbound.is_writable());
    }

    #[test]
    fn add_flush_drops_cancelled_unflushed_entries() {
        let outbound = OutboundBuffer::new(1024, 2048);
        let promise: Promise<()> = Promise::new();
        outbound.add_message(buf_with(b"hello"), promise.clone());
        assert!(outbound.cancel_unflushed(&promise));
        outbound.add_flush();
        assert!(outbound.current().is_none());
    }

    #[test]
    fn remove_bytes_consumes_whole_and_partial_entries() {
        let outbound = OutboundBuffer::new(1024, 2048);
        outbound.add_message(buf_with(b"abc"), Promise::new());
        outbound.add_message(buf_with(b"defgh"), Promise::new());
        outbound.add_flush();

        outbound.remove_bytes(5).unwrap(); // consumes "abc" + 2 bytes of "defgh"
        let remaining = outbound.current().unwrap();
        assert_eq!(remaining.readable_bytes(), 3);
        remaining.with_readable(|s| assert_eq!(s, b"fgh"));
    }

    #[test]
    fn nio_buffers_respects_max_count_and_max_bytes() {
        let outbound = OutboundBuffer::new(1024, 2048);
        outbound.add_message(buf_with(b"aa"), Promise::new());
        outbound.add_message(buf_with(b"bb"), Promise::new());
        outbound.add_message(buf_with(b"cc"), Promise::new());
        outbound.add_flush();

        outbound.with_nio_buffers(2, 100, |slices| assert_eq!(slices.len(), 2));
        // first entry is always admitted in full; the second is truncated
        // to the remaining byte budget rather than dropped.
        outbound.with_nio_buffers(100, 3, |slices| assert_eq!(slices.len(), 2));
    }

    #[test]
    fn fail_flushed_is_reentrancy_guarded() {
        let outbound = OutboundBuffer::new(1024, 2048);
        outbound.add_message(buf_with(b"x"), Promise::new());
        outbound.add_flush();
        outbound.fail_flushed(CoreError::closed("test")).unwrap();
        assert!(outbound.current().is_none());
    }

    #[test]
    fn close_rejects_all_writes_once_permanently_closed() {
        let outbound = OutboundBuffer::new(1024, 2048);
        outbound
            .close(CoreError::closed("channel"), false, || unreachable!())
            .unwrap();

        let promise: Promise<()> = Promise::new();
        let future = promise.future();
        outbound.add_message(buf_with(b"too late"), promise);
        assert!(!future.outcome().unwrap().is_success());
    }

    #[test]
    fn close_allowing_open_channel_still_accepts_writes_afterward() {
        let outbound = OutboundBuffer::new(1024, 2048);
        outbound
            .close(CoreError::closed("half-close"), true, || unreachable!())
            .unwrap();

        let promise: Promise<()> = Promise::new();
        outbound.add_message(buf_with(b"still open"), promise);
        assert!(outbound.total_pending_bytes() > 0);
    }

    #[test]
    fn reentrant_close_reschedules_instead_of_reentering() {
        let outbound = OutboundBuffer::new(1024, 2048);
        let rescheduled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let rescheduled_inner = Arc::clone(&rescheduled);

        outbound
            .close(CoreError::closed("outer"), false, || unreachable!())
            .unwrap();

        // Simulate a close already in flight by flipping the guard directly,
        // then confirm a second call is absorbed via `reschedule` rather
        // than tripping the flushed-entries precondition.
        outbound.inner.lock().closing_in_progress = true;
        outbound
            .close(CoreError::closed("reentrant"), false, move || {
                rescheduled_inner.store(true, Ordering::SeqCst);
            })
            .unwrap();
        assert!(rescheduled.load(Ordering::SeqCst));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Flush,
        Remove,
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::strategy::Strategy;
        proptest::prop_oneof![
            (1usize..64).prop_map(Op::Add),
            proptest::strategy::Just(Op::Flush),
            proptest::strategy::Just(Op::Remove),
        ]
    }

    proptest::proptest! {
        /// Outbound-accounting invariants (spec §8): `total_pending_bytes`
        /// always equals the sum of every entry still queued (flushed or
        /// not, nothing cancelled here) and never goes negative, for any
        /// add/flush/remove sequence; draining every entry always brings it
        /// back to exactly zero.
        #[test]
        fn accounting_matches_queued_entries_for_any_op_sequence(
            ops in proptest::collection::vec(op_strategy(), 1..48)
        ) {
            let outbound = OutboundBuffer::new(usize::MAX / 2, usize::MAX / 2);
            let mut expected: i64 = 0;

            for op in ops {
                match op {
                    Op::Add(len) => {
                        outbound.add_message(buf_with(&vec![0u8; len]), Promise::new());
                        expected += (super::super::entry::ENTRY_OVERHEAD + len) as i64;
                    }
                    Op::Flush => outbound.add_flush(),
                    Op::Remove => {
                        if let Some(buf) = outbound.current() {
                            expected -= (super::super::entry::ENTRY_OVERHEAD + buf.readable_bytes()) as i64;
                            outbound.remove().unwrap();
                        }
                    }
                }
                assert!(outbound.total_pending_bytes() >= 0);
                assert_eq!(outbound.total_pending_bytes(), expected);
            }

            outbound.add_flush();
            while outbound.current().is_some() {
                outbound.remove().unwrap();
            }
            assert_eq!(outbound.total_pending_bytes(), 0);
        }
    }
}
