//! Zero-copy concatenation of component buffers appearing as one logical
//! buffer (spec §3 "Buffer", SPEC_FULL §E).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CoreError;

use super::bytebuf::ByteBuf;
use super::refcount::{RefCountState, RefCounted};

struct Component {
    buf: Arc<ByteBuf>,
    /// Offset of this component's first readable byte within the
    /// composite buffer's logical address space.
    offset: usize,
}

struct Inner {
    components: Vec<Component>,
    max_num_components: usize,
}

/// A buffer made of an ordered list of components, each a view into an
/// owned child buffer. Reading advances through components in order;
/// `locate` finds which component covers a given logical index, used by
/// [`crate::outbound::OutboundBuffer::nio_buffers`] to build gather views
/// without copying.
pub struct CompositeBuffer {
    refcount: RefCountState,
    inner: Mutex<Inner>,
}

impl CompositeBuffer {
    /// Creates an empty composite buffer accepting up to
    /// `max_num_components` children.
    pub fn new(max_num_components: usize) -> Self {
        Self {
            refcount: RefCountState::new(),
            inner: Mutex::new(Inner {
                components: Vec::new(),
                max_num_components,
            }),
        }
    }

    /// Appends `child` as a new component. Fails if doing so would exceed
    /// `max_num_components`.
    pub fn add_component(&self, child: Arc<ByteBuf>) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        if inner.components.len() >= inner.max_num_components {
            return Err(CoreError::capacity_exceeded(
                inner.components.len() + 1,
                inner.max_num_components,
            ));
        }
        let offset = inner
            .components
            .last()
            .map(|c| c.offset + c.buf.readable_bytes())
            .unwrap_or(0);
        inner.components.push(Component { buf: child, offset });
        Ok(())
    }

    /// Total readable bytes across every component.
    pub fn readable_bytes(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .components
            .last()
            .map(|c| c.offset + c.buf.readable_bytes())
            .unwrap_or(0)
    }

    /// The number of components currently held.
    pub fn num_components(&self) -> usize {
        self.inner.lock().components.len()
    }

    /// Finds the component covering logical index `index`, returning its
    /// position in the component list and the byte offset within that
    /// component. Returns `None` if `index` is past the last readable
    /// byte.
    pub fn locate(&self, index: usize) -> Option<(usize, usize)> {
        let inner = self.inner.lock();
        for (i, component) in inner.components.iter().enumerate() {
            let len = component.buf.readable_bytes();
            if index < component.offset + len {
                return Some((i, index - component.offset));
            }
        }
        None
    }

    /// Runs `f` against every component's readable slice in order, passing
    /// the full slice of each so the caller can build a gather-write view
    /// without copying. Stops early and returns what `f` returned if `f`
    /// ever returns `Some`.
    pub fn for_each_component<R>(&self, mut f: impl FnMut(&[u8]) -> Option<R>) -> Option<R> {
        let inner = self.inner.lock();
        for component in inner.components.iter() {
            let result = component.buf.with_readable(&mut f);
            if result.is_some() {
                return result;
            }
        }
        None
    }
}

impl RefCounted for CompositeBuffer {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_finds_component_covering_index() {
        let composite = CompositeBuffer::new(8);
        let a = Arc::new(ByteBuf::new(4, 16));
        a.write_slice(b"abcd").unwrap();
        let b = Arc::new(ByteBuf::new(4, 16));
        b.write_slice(b"efgh").unwrap();
        composite.add_component(a).unwrap();
        composite.add_component(b).unwrap();

        assert_eq!(composite.readable_bytes(), 8);
        assert_eq!(composite.locate(0), Some((0, 0)));
        assert_eq!(composite.locate(3), Some((0, 3)));
        assert_eq!(composite.locate(4), Some((1, 0)));
        assert_eq!(composite.locate(7), Some((1, 3)));
        assert_eq!(composite.locate(8), None);
    }

    #[test]
    fn add_component_past_limit_fails() {
        let composite = CompositeBuffer::new(1);
        composite
            .add_component(Arc::new(ByteBuf::new(4, 16)))
            .unwrap();
        assert!(composite.add_component(Arc::new(ByteBuf::new(4, 16))).is_err());
    }
}
