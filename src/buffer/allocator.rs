//! The byte allocator contract: `heap`, `direct`, `io`, and `composite`
//! buffer construction with a power-of-two growth policy (spec §4.3).

use crate::error::CoreError;

use super::bytebuf::ByteBuf;
use super::composite::CompositeBuffer;

/// Computes the smallest power of two `>= requested`, clamped to
/// `max_capacity`. Requests already exceeding `max_capacity` are the
/// caller's problem to reject (see [`ByteBuf::write_slice`]) — this
/// function only decides how far to grow *within* the ceiling.
pub fn next_capacity(requested: usize, max_capacity: usize) -> usize {
    if requested >= max_capacity {
        return max_capacity;
    }
    requested.next_power_of_two().min(max_capacity)
}

/// Produces buffers. This crate has no direct/off-heap memory distinction
/// at the OS level (that belongs to a transport backend), so `direct`
/// and `io` both return heap buffers here; a real backend-aware allocator
/// would override `io` to prefer direct memory when the platform supports
/// it (spec §4.3 "`io` prefers direct when the platform supports it").
pub trait ByteBufAllocator: Send + Sync {
    /// Allocates a heap buffer.
    fn heap(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf;

    /// Allocates a buffer intended for off-heap/direct storage.
    fn direct(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        self.heap(initial_capacity, max_capacity)
    }

    /// Allocates a buffer for I/O, preferring direct memory when available.
    fn io(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        self.direct(initial_capacity, max_capacity)
    }

    /// Allocates an empty composite buffer ready to hold component views.
    fn composite(&self, max_num_components: usize) -> CompositeBuffer {
        CompositeBuffer::new(max_num_components)
    }
}

/// The default allocator: every buffer is a plain heap `Vec<u8>`, no
/// pooling — Netty's `UnpooledByteBufAllocator` equivalent (spec SPEC_FULL
/// §E "Supplemented features").
#[derive(Default)]
pub struct UnpooledAllocator;

impl ByteBufAllocator for UnpooledAllocator {
    fn heap(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        ByteBuf::new(initial_capacity, max_capacity)
    }
}

/// Allocates directly off an explicit byte slice/vec, failing if it would
/// not fit `max_capacity` — a convenience constructor pools and the
/// recv-allocator's `allocate` path both go through.
pub fn wrap(data: Vec<u8>, max_capacity: usize) -> Result<ByteBuf, CoreError> {
    if data.len() > max_capacity {
        return Err(CoreError::capacity_exceeded(data.len(), max_capacity));
    }
    Ok(ByteBuf::from_vec(data, max_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_capacity_rounds_up_to_power_of_two() {
        assert_eq!(next_capacity(100, 1 << 20), 128);
        assert_eq!(next_capacity(128, 1 << 20), 128);
        assert_eq!(next_capacity(129, 1 << 20), 256);
    }

    #[test]
    fn next_capacity_clamps_to_max() {
        assert_eq!(next_capacity(1000, 512), 512);
    }

    #[test]
    fn unpooled_allocator_builds_usable_buffer() {
        let allocator = UnpooledAllocator;
        let buf = allocator.heap(16, 1024);
        buf.write_slice(b"hi").unwrap();
        assert_eq!(buf.readable_bytes(), 2);
    }
}
