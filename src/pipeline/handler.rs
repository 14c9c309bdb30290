//! Inbound/outbound/duplex handler contracts (spec §4.5, §9).
//!
//! Every message flowing through this pipeline is an [`Arc<ByteBuf>`] —
//! this crate has no type-changing codec layer (concrete codecs are out of
//! scope), so the contract is specialized to bytes rather than `Any`-erased
//! like a general-purpose framework would need.

use std::sync::Arc;

use crate::buffer::ByteBuf;
use crate::error::CoreError;
use crate::future::Promise;

use super::context::HandlerContext;

/// The message type flowing through the pipeline.
pub type PipelineMessage = Arc<ByteBuf>;

/// Inbound event callbacks, default-forwarding to the next context so a
/// handler only needs to override what it actually cares about.
pub trait InboundHandler: Send + Sync {
    /// A short name for diagnostics; defaults to the type name.
    fn name(&self) -> &str {
        "inbound-handler"
    }

    fn channel_registered(&self, ctx: &HandlerContext) {
        ctx.fire_channel_registered();
    }

    fn channel_unregistered(&self, ctx: &HandlerContext) {
        ctx.fire_channel_unregistered();
    }

    fn channel_active(&self, ctx: &HandlerContext) {
        ctx.fire_channel_active();
    }

    fn channel_inactive(&self, ctx: &HandlerContext) {
        ctx.fire_channel_inactive();
    }

    fn channel_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        ctx.fire_channel_read(msg);
    }

    fn channel_read_complete(&self, ctx: &HandlerContext) {
        ctx.fire_channel_read_complete();
    }

    fn channel_writability_changed(&self, ctx: &HandlerContext, is_writable: bool) {
        ctx.fire_channel_writability_changed(is_writable);
    }

    fn exception_caught(&self, ctx: &HandlerContext, cause: CoreError) {
        ctx.fire_exception_caught(cause);
    }

    /// Called once, when this handler is added to a pipeline, before any
    /// other callback.
    fn handler_added(&self, _ctx: &HandlerContext) {}

    /// Called once this handler has been removed; no further callbacks
    /// follow (spec §4.5 "a removed handler sees no further events").
    fn handler_removed(&self, _ctx: &HandlerContext) {}
}

/// Outbound request callbacks, default-forwarding toward Head.
pub trait OutboundHandler: Send + Sync {
    fn name(&self) -> &str {
        "outbound-handler"
    }

    fn write(&self, ctx: &HandlerContext, msg: PipelineMessage, promise: Promise<()>) {
        ctx.write(msg, promise);
    }

    fn flush(&self, ctx: &HandlerContext) {
        ctx.flush();
    }

    fn close(&self, ctx: &HandlerContext, promise: Promise<()>) {
        ctx.close(promise);
    }

    fn handler_added(&self, _ctx: &HandlerContext) {}

    fn handler_removed(&self, _ctx: &HandlerContext) {}
}

/// A handler that takes part in both directions. Any type implementing
/// both halves gets this automatically.
pub trait DuplexHandler: InboundHandler + OutboundHandler {}

impl<T: InboundHandler + OutboundHandler> DuplexHandler for T {}

/// The tail's default behavior: release unconsumed inbound messages and
/// log unhandled exceptions (spec §4.5 "Tail-of-pipeline behavior").
pub(super) struct TailHandler;

impl InboundHandler for TailHandler {
    fn name(&self) -> &str {
        "tail"
    }

    fn channel_read(&self, _ctx: &HandlerContext, msg: PipelineMessage) {
        if let Err(error) = crate::buffer::RefCounted::release(&*msg, 1) {
            tracing::warn!(%error, "tail failed to release unconsumed inbound message");
        }
    }

    fn exception_caught(&self, _ctx: &HandlerContext, cause: CoreError) {
        tracing::warn!(%cause, "unhandled exception reached the tail of the pipeline");
    }
}

/// The head's default behavior: the only handler allowed to touch the
/// channel's outbound buffer and `Unsafe` directly.
pub(super) struct HeadHandler;

impl InboundHandler for HeadHandler {
    fn name(&self) -> &str {
        "head"
    }
}

impl OutboundHandler for HeadHandler {
    fn name(&self) -> &str {
        "head"
    }

    fn write(&self, ctx: &HandlerContext, msg: PipelineMessage, promise: Promise<()>) {
        ctx.channel_write_direct(msg, promise);
    }

    fn flush(&self, ctx: &HandlerContext) {
        ctx.channel_flush_direct();
    }

    fn close(&self, ctx: &HandlerContext, promise: Promise<()>) {
        ctx.channel_close_direct(promise);
    }
}
