//! The typed channel configuration surface (spec §6's option table,
//! SPEC_FULL §C).

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::ByteBufAllocator;
use crate::recv::RecvByteBufAllocator;

/// The two watermarks controlling outbound-buffer writability (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBufferWaterMark {
    low: usize,
    high: usize,
}

impl WriteBufferWaterMark {
    /// Creates a pair, panicking if `low > high` (spec §4.6 invariant).
    pub fn new(low: usize, high: usize) -> Self {
        assert!(low <= high, "low watermark must not exceed high watermark");
        Self { low, high }
    }

    /// The low watermark.
    pub fn low(&self) -> usize {
        self.low
    }

    /// The high watermark.
    pub fn high(&self) -> usize {
        self.high
    }
}

impl Default for WriteBufferWaterMark {
    /// Netty's defaults: 32 KiB low, 64 KiB high.
    fn default() -> Self {
        Self::new(32 * 1024, 64 * 1024)
    }
}

/// The mutable configuration bag attached to one channel. Every field
/// corresponds to a row of spec §6's option table.
pub struct ChannelConfig {
    connect_timeout: Duration,
    write_spin_count: u32,
    allocator: Arc<dyn ByteBufAllocator>,
    recv_allocator: Arc<dyn RecvByteBufAllocator>,
    auto_read: bool,
    /// Kept for migration but never consulted by the write path — a write
    /// failure never closes the channel regardless of this flag (spec §9
    /// open question (a); resolved in DESIGN.md).
    auto_close: bool,
    water_mark: WriteBufferWaterMark,
    max_messages_per_read: u32,
}

impl ChannelConfig {
    /// Builds a configuration with the documented defaults and the given
    /// allocators.
    pub fn new(
        allocator: Arc<dyn ByteBufAllocator>,
        recv_allocator: Arc<dyn RecvByteBufAllocator>,
    ) -> Self {
        Self {
            connect_timeout: Duration::from_millis(30_000),
            write_spin_count: 16,
            allocator,
            recv_allocator,
            auto_read: true,
            auto_close: false,
            water_mark: WriteBufferWaterMark::default(),
            max_messages_per_read: 16,
        }
    }

    /// `CONNECT_TIMEOUT_MILLIS`. `Duration::ZERO` means unlimited.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Sets `CONNECT_TIMEOUT_MILLIS`.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// `WRITE_SPIN_COUNT`: max write-loop iterations per flush before
    /// yielding back to the event loop.
    pub fn write_spin_count(&self) -> u32 {
        self.write_spin_count
    }

    /// Sets `WRITE_SPIN_COUNT`.
    pub fn set_write_spin_count(&mut self, count: u32) {
        self.write_spin_count = count;
    }

    /// `ALLOCATOR`.
    pub fn allocator(&self) -> &Arc<dyn ByteBufAllocator> {
        &self.allocator
    }

    /// Sets `ALLOCATOR`.
    pub fn set_allocator(&mut self, allocator: Arc<dyn ByteBufAllocator>) {
        self.allocator = allocator;
    }

    /// `RCVBUF_ALLOCATOR`.
    pub fn recv_allocator(&self) -> &Arc<dyn RecvByteBufAllocator> {
        &self.recv_allocator
    }

    /// Sets `RCVBUF_ALLOCATOR`.
    pub fn set_recv_allocator(&mut self, allocator: Arc<dyn RecvByteBufAllocator>) {
        self.recv_allocator = allocator;
    }

    /// `AUTO_READ`: if true, the loop issues an implicit `read()` after
    /// each read-complete.
    pub fn auto_read(&self) -> bool {
        self.auto_read
    }

    /// Sets `AUTO_READ`.
    pub fn set_auto_read(&mut self, enabled: bool) {
        self.auto_read = enabled;
    }

    /// `AUTO_CLOSE` (deprecated; see struct docs).
    pub fn auto_close(&self) -> bool {
        self.auto_close
    }

    /// Sets `AUTO_CLOSE` (deprecated; has no effect on write-failure
    /// handling).
    pub fn set_auto_close(&mut self, enabled: bool) {
        self.auto_close = enabled;
    }

    /// `WRITE_BUFFER_HIGH_WATER_MARK` / `WRITE_BUFFER_LOW_WATER_MARK` /
    /// `WRITE_BUFFER_WATER_MARK` combined.
    pub fn water_mark(&self) -> WriteBufferWaterMark {
        self.water_mark
    }

    /// Sets both watermarks together (`WRITE_BUFFER_WATER_MARK`).
    pub fn set_water_mark(&mut self, water_mark: WriteBufferWaterMark) {
        self.water_mark = water_mark;
    }

    /// Sets only the high watermark (`WRITE_BUFFER_HIGH_WATER_MARK`).
    pub fn set_high_water_mark(&mut self, high: usize) {
        self.water_mark = WriteBufferWaterMark::new(self.water_mark.low.min(high), high);
    }

    /// Sets only the low watermark (`WRITE_BUFFER_LOW_WATER_MARK`).
    pub fn set_low_water_mark(&mut self, low: usize) {
        self.water_mark = WriteBufferWaterMark::new(low, self.water_mark.high.max(low));
    }

    /// `MAX_MESSAGES_PER_READ`.
    pub fn max_messages_per_read(&self) -> u32 {
        self.max_messages_per_read
    }

    /// Sets `MAX_MESSAGES_PER_READ`.
    pub fn set_max_messages_per_read(&mut self, max: u32) {
        self.max_messages_per_read = max;
    }
}
