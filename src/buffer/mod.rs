//! Reference-counted buffer contract and pooled byte container (spec §3
//! "Message"/"Buffer", §4.3, §7, §9).

mod allocator;
mod bytebuf;
mod composite;
mod leak;
mod refcount;

pub use allocator::{wrap, ByteBufAllocator, UnpooledAllocator};
pub use bytebuf::ByteBuf;
pub use composite::CompositeBuffer;
pub use leak::LeakDetector;
pub use refcount::RefCounted;

/// Any message flowing through the pipeline. A marker trait: most messages
/// need no special lifetime discipline (Rust's ownership already moves
/// them handler to handler); only messages that are genuinely shared
/// (broadcast to a [`crate::group::ChannelGroup`], or split into composite
/// views) additionally implement [`RefCounted`] (spec §9 "Reference
/// counting vs ownership").
pub trait Message: Send + 'static {}

impl<T: Send + 'static> Message for T {}

/// Messages that know how to produce an independent view of themselves for
/// broadcast to multiple recipients (spec §4.8, §9 open question (b)). Only
/// buffers and buffer-holders implement this by default; broadcasting any
/// other reference-counted message without an explicit `Duplicate` impl is
/// rejected.
pub trait Duplicate: RefCounted {
    /// Produces an independent, separately ref-counted view sharing the
    /// same underlying storage (a "slice" / "retained duplicate").
    fn duplicate(&self) -> Self
    where
        Self: Sized;
}
