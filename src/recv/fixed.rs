//! The fixed-size predictor: always guesses the same configured capacity.

use super::{RecvByteBufAllocator, RecvByteBufAllocatorHandle};

/// Always predicts the same buffer size, never adapting to observed read
/// sizes. Useful when message sizes are already known (e.g. a fixed-frame
/// protocol upstream).
pub struct FixedRecvByteBufAllocator {
    size: usize,
}

impl FixedRecvByteBufAllocator {
    /// Creates an allocator that always predicts `size` bytes.
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl RecvByteBufAllocator for FixedRecvByteBufAllocator {
    fn new_handle(&self) -> Box<dyn RecvByteBufAllocatorHandle> {
        Box::new(Handle {
            size: self.size,
            total_read: 0,
            attempted: 0,
            last_filled: false,
            eof: false,
        })
    }
}

struct Handle {
    size: usize,
    total_read: usize,
    attempted: usize,
    /// Whether the most recent read filled the whole attempted capacity.
    last_filled: bool,
    /// Whether the most recent read observed EOF/close.
    eof: bool,
}

impl RecvByteBufAllocatorHandle for Handle {
    fn guess(&self) -> usize {
        self.size
    }

    fn attempted_bytes_read(&mut self, bytes: usize) {
        self.attempted = bytes;
    }

    fn last_bytes_read(&mut self, bytes: Option<usize>) {
        match bytes {
            Some(read) => {
                self.total_read += read;
                self.last_filled = self.attempted > 0 && read >= self.attempted;
                self.eof = false;
            }
            None => {
                self.last_filled = false;
                self.eof = true;
            }
        }
    }

    fn total_bytes_read(&self) -> usize {
        self.total_read
    }

    fn continue_reading(&self, max_messages_per_read: u32, messages_read: u32) -> bool {
        !self.eof && self.last_filled && messages_read < max_messages_per_read
    }

    fn reset(&mut self) {
        self.total_read = 0;
        self.attempted = 0;
        self.last_filled = false;
        self.eof = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_reading_stops_once_the_last_read_underfills() {
        let allocator = FixedRecvByteBufAllocator::new(128);
        let mut handle = allocator.new_handle();

        handle.attempted_bytes_read(128);
        handle.last_bytes_read(Some(128));
        assert!(handle.continue_reading(16, 1));

        handle.attempted_bytes_read(128);
        handle.last_bytes_read(Some(10));
        assert!(!handle.continue_reading(16, 2));
    }

    #[test]
    fn continue_reading_stops_on_eof() {
        let allocator = FixedRecvByteBufAllocator::new(128);
        let mut handle = allocator.new_handle();
        handle.attempted_bytes_read(128);
        handle.last_bytes_read(None);
        assert!(!handle.continue_reading(16, 0));
    }
}
