//! One queued write and everything needed to track its progress (spec
//! §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::ByteBuf;
use crate::future::Promise;

/// A single entry in the outbound buffer: the buffer being written, its
/// accounting, and the promise completed once it is fully written (or
/// fails/cancels).
pub struct Entry {
    pub(super) message: Arc<ByteBuf>,
    /// Bytes + a fixed per-entry bookkeeping overhead, matching Netty's
    /// `CHANNEL_OUTBOUND_BUFFER_ENTRY_OVERHEAD` constant so tests can
    /// reason about watermark crossings independent of payload size.
    pub(super) pending_size: usize,
    pub(super) total: usize,
    pub(super) progress_so_far: usize,
    pub(super) promise: Promise<()>,
    pub(super) cancelled: AtomicBool,
}

/// Fixed overhead charged per entry on top of its byte size, matching
/// Netty's constant of the same purpose.
pub const ENTRY_OVERHEAD: usize = 96;

impl Entry {
    pub(super) fn new(message: Arc<ByteBuf>, promise: Promise<()>) -> Self {
        let total = message.readable_bytes();
        Self {
            message,
            pending_size: total + ENTRY_OVERHEAD,
            total,
            progress_so_far: 0,
            promise,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Whether this entry was cancelled before being fully written.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Marks this entry cancelled. Idempotent.
    pub(super) fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// The message this entry carries.
    pub fn message(&self) -> &Arc<ByteBuf> {
        &self.message
    }

    /// Total pending size (bytes + overhead) charged against the
    /// outbound buffer's watermark accounting.
    pub fn pending_size(&self) -> usize {
        self.pending_size
    }
}
