//! The adaptive predictor: a geometric ladder of buffer sizes with
//! hysteresis, shrinking only after two consecutive small reads and
//! growing immediately on a full read (spec §4.7 "adaptive allocator").

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{RecvByteBufAllocator, RecvByteBufAllocatorHandle};

/// The stock ladder of buffer sizes Netty's `AdaptiveRecvByteBufAllocator`
/// uses below 512 bytes, after which sizes simply double.
const SIZE_TABLE_SMALL: &[usize] = &[
    16, 32, 48, 64, 80, 96, 112, 128, 144, 160, 176, 192, 208, 224, 240, 256, 272, 288, 304, 320,
    336, 352, 368, 384, 400, 416, 432, 448, 464, 480, 496, 512,
];

fn index_for_at_least(size: usize) -> usize {
    if size <= 512 {
        SIZE_TABLE_SMALL
            .iter()
            .position(|&s| s >= size)
            .unwrap_or(SIZE_TABLE_SMALL.len() - 1)
    } else {
        // Above the table, sizes double: 1024, 2048, 4096, ... Index space
        // continues from the table's end.
        let mut candidate = 512usize;
        let mut idx = SIZE_TABLE_SMALL.len() - 1;
        while candidate < size {
            candidate = candidate.saturating_mul(2);
            idx += 1;
        }
        idx
    }
}

fn size_for_index(index: usize) -> usize {
    if index < SIZE_TABLE_SMALL.len() {
        SIZE_TABLE_SMALL[index]
    } else {
        let doublings = (index - SIZE_TABLE_SMALL.len() + 1) as u32;
        1usize
            .checked_shl(doublings)
            .map(|shifted| 512usize.saturating_mul(shifted))
            .unwrap_or(usize::MAX)
    }
}

/// A predictor that grows its guess immediately when a read fills the
/// whole buffer, and shrinks it only after `UNDERFLOW_ROUNDS` consecutive
/// reads use under a quarter of the guessed capacity — hysteresis that
/// avoids thrashing between sizes on bursty traffic.
pub struct AdaptiveRecvByteBufAllocator {
    minimum: usize,
    maximum: usize,
    initial: usize,
}

const UNDERFLOW_ROUNDS: u32 = 2;

impl AdaptiveRecvByteBufAllocator {
    /// Creates an allocator that predicts within `[minimum, maximum]`,
    /// starting at `initial`.
    pub fn new(minimum: usize, initial: usize, maximum: usize) -> Self {
        assert!(minimum <= initial && initial <= maximum);
        Self {
            minimum,
            maximum,
            initial,
        }
    }
}

impl Default for AdaptiveRecvByteBufAllocator {
    /// Netty's defaults: 64 B floor, 1 KiB initial guess, 64 KiB ceiling.
    fn default() -> Self {
        Self::new(64, 1024, 65536)
    }
}

impl RecvByteBufAllocator for AdaptiveRecvByteBufAllocator {
    fn new_handle(&self) -> Box<dyn RecvByteBufAllocatorHandle> {
        Box::new(Handle {
            minimum: self.minimum,
            maximum: self.maximum,
            index: AtomicUsize::new(index_for_at_least(self.initial)),
            decrease_streak: 0,
            attempted: 0,
            total_read: 0,
            last_filled: false,
            eof: false,
        })
    }
}

struct Handle {
    minimum: usize,
    maximum: usize,
    index: AtomicUsize,
    decrease_streak: u32,
    attempted: usize,
    total_read: usize,
    /// Whether the most recent read filled the whole attempted capacity.
    last_filled: bool,
    /// Whether the most recent read observed EOF/close.
    eof: bool,
}

impl RecvByteBufAllocatorHandle for Handle {
    fn guess(&self) -> usize {
        size_for_index(self.index.load(Ordering::Relaxed)).clamp(self.minimum, self.maximum)
    }

    fn attempted_bytes_read(&mut self, bytes: usize) {
        self.attempted = bytes;
    }

    fn last_bytes_read(&mut self, bytes: Option<usize>) {
        let read = match bytes {
            Some(read) => read,
            None => {
                self.eof = true;
                self.last_filled = false;
                return;
            }
        };
        self.eof = false;
        self.total_read += read;
        self.last_filled = self.attempted > 0 && read >= self.attempted;

        if self.attempted == 0 {
            return;
        }

        if read >= self.attempted {
            // Filled the buffer: grow immediately, reset any decrease streak.
            self.decrease_streak = 0;
            let next = index_for_at_least(self.attempted * 2).min(SIZE_TABLE_SMALL.len() + 32);
            self.index.fetch_max(next, Ordering::Relaxed);
        } else if read < self.attempted / 4 {
            self.decrease_streak += 1;
            if self.decrease_streak >= UNDERFLOW_ROUNDS {
                self.decrease_streak = 0;
                let current = self.index.load(Ordering::Relaxed);
                let shrunk = current.saturating_sub(1);
                self.index.store(shrunk, Ordering::Relaxed);
            }
        } else {
            self.decrease_streak = 0;
        }
    }

    fn total_bytes_read(&self) -> usize {
        self.total_read
    }

    fn continue_reading(&self, max_messages_per_read: u32, messages_read: u32) -> bool {
        // Stop once the most recent attempt didn't fill the buffer — the
        // peer has nothing more buffered right now — or EOF was observed.
        !self.eof && self.last_filled && messages_read < max_messages_per_read
    }

    fn reset(&mut self) {
        self.attempted = 0;
        self.total_read = 0;
        self.last_filled = false;
        self.eof = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_immediately_on_full_read() {
        let allocator = AdaptiveRecvByteBufAllocator::new(64, 1024, 65536);
        let mut handle = allocator.new_handle();
        let before = handle.guess();
        handle.attempted_bytes_read(before);
        handle.last_bytes_read(Some(before));
        assert!(handle.guess() > before);
    }

    #[test]
    fn shrinks_only_after_two_consecutive_small_reads() {
        let allocator = AdaptiveRecvByteBufAllocator::new(64, 4096, 65536);
        let mut handle = allocator.new_handle();
        let before = handle.guess();

        handle.attempted_bytes_read(before);
        handle.last_bytes_read(Some(before / 8));
        assert_eq!(handle.guess(), before, "first small read should not shrink yet");

        handle.attempted_bytes_read(before);
        handle.last_bytes_read(Some(before / 8));
        assert!(handle.guess() < before, "second consecutive small read shrinks");
    }

    #[test]
    fn respects_configured_floor_and_ceiling() {
        let allocator = AdaptiveRecvByteBufAllocator::new(64, 64, 64);
        let mut handle = allocator.new_handle();
        handle.attempted_bytes_read(64);
        handle.last_bytes_read(Some(64));
        assert_eq!(handle.guess(), 64);
    }

    #[test]
    fn continue_reading_stops_once_the_last_read_underfills() {
        let allocator = AdaptiveRecvByteBufAllocator::new(64, 1024, 65536);
        let mut handle = allocator.new_handle();
        let guess = handle.guess();

        handle.attempted_bytes_read(guess);
        handle.last_bytes_read(Some(guess));
        assert!(handle.continue_reading(16, 1), "a full read should keep draining");

        handle.attempted_bytes_read(handle.guess());
        handle.last_bytes_read(Some(1));
        assert!(
            !handle.continue_reading(16, 2),
            "an underfilled read should stop the cycle even under the message cap"
        );
    }

    #[test]
    fn continue_reading_stops_on_eof_even_if_the_buffer_was_full() {
        let allocator = AdaptiveRecvByteBufAllocator::new(64, 1024, 65536);
        let mut handle = allocator.new_handle();
        let guess = handle.guess();

        handle.attempted_bytes_read(guess);
        handle.last_bytes_read(Some(guess));
        handle.attempted_bytes_read(handle.guess());
        handle.last_bytes_read(None);
        assert!(!handle.continue_reading(16, 2));
    }

    #[test]
    fn continue_reading_respects_the_message_cap() {
        let allocator = AdaptiveRecvByteBufAllocator::new(64, 1024, 65536);
        let mut handle = allocator.new_handle();
        let guess = handle.guess();
        handle.attempted_bytes_read(guess);
        handle.last_bytes_read(Some(guess));
        assert!(!handle.continue_reading(1, 1));
    }
}
