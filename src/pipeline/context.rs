//! One arena slot per handler, addressed by index rather than an
//! intrusive pointer (REDESIGN FLAGS: "an arena-with-indices arrangement
//! is preferred over reference counting for contexts").

use std::sync::Arc;

use crate::error::CoreError;
use crate::future::Promise;

use super::handler::{InboundHandler, OutboundHandler, PipelineMessage};
use super::pipeline::PipelineInner;

pub(super) struct Node {
    pub(super) name: String,
    pub(super) inbound: Option<Arc<dyn InboundHandler>>,
    pub(super) outbound: Option<Arc<dyn OutboundHandler>>,
    pub(super) prev: Option<usize>,
    pub(super) next: Option<usize>,
    pub(super) removed: bool,
}

/// A handle identifying one context within its pipeline. Cheap to copy;
/// contexts never outlive the pipeline that created them (REDESIGN FLAGS).
#[derive(Clone)]
pub struct HandlerContext {
    pub(super) pipeline: Arc<PipelineInner>,
    pub(super) index: usize,
}

impl HandlerContext {
    /// The name this context was registered under.
    pub fn name(&self) -> String {
        self.pipeline.nodes.lock()[self.index].name.clone()
    }

    /// Fires `channelRegistered` on the next inbound context.
    pub fn fire_channel_registered(&self) {
        self.pipeline.propagate_inbound(self.index, |h, ctx| h.channel_registered(ctx));
    }

    /// Fires `channelUnregistered` on the next inbound context.
    pub fn fire_channel_unregistered(&self) {
        self.pipeline
            .propagate_inbound(self.index, |h, ctx| h.channel_unregistered(ctx));
    }

    /// Fires `channelActive` on the next inbound context.
    pub fn fire_channel_active(&self) {
        self.pipeline.propagate_inbound(self.index, |h, ctx| h.channel_active(ctx));
    }

    /// Fires `channelInactive` on the next inbound context.
    pub fn fire_channel_inactive(&self) {
        self.pipeline
            .propagate_inbound(self.index, |h, ctx| h.channel_inactive(ctx));
    }

    /// Fires `channelRead` on the next inbound context.
    pub fn fire_channel_read(&self, msg: PipelineMessage) {
        self.pipeline
            .propagate_inbound_with(self.index, msg, |h, ctx, msg| h.channel_read(ctx, msg));
    }

    /// Fires `channelReadComplete` on the next inbound context.
    pub fn fire_channel_read_complete(&self) {
        self.pipeline
            .propagate_inbound(self.index, |h, ctx| h.channel_read_complete(ctx));
    }

    /// Fires `channelWritabilityChanged` on the next inbound context.
    pub fn fire_channel_writability_changed(&self, is_writable: bool) {
        self.pipeline.propagate_inbound(self.index, move |h, ctx| {
            h.channel_writability_changed(ctx, is_writable)
        });
    }

    /// Re-fires an exception on the *next* inbound context — per spec
    /// §4.5, exceptions thrown from an inbound callback are re-raised as
    /// `exceptionCaught` starting from the context after the one that
    /// threw, not the one that threw.
    pub fn fire_exception_caught(&self, cause: CoreError) {
        self.pipeline
            .propagate_inbound_with(self.index, cause, |h, ctx, cause| {
                h.exception_caught(ctx, cause)
            });
    }

    /// `write`: propagates toward Head (reverse insertion order).
    pub fn write(&self, msg: PipelineMessage, promise: Promise<()>) {
        let promise_for_panic = promise.clone();
        self.pipeline.propagate_outbound_with(
            self.index,
            (msg, promise),
            |h, ctx, (msg, promise)| h.write(ctx, msg, promise),
            move |panic_payload| {
                promise_for_panic.try_failure(CoreError::from_panic(panic_payload));
            },
        );
    }

    /// `flush`: propagates toward Head.
    pub fn flush(&self) {
        self.pipeline.propagate_outbound(self.index, |h, ctx| h.flush(ctx));
    }

    /// `close`: propagates toward Head.
    pub fn close(&self, promise: Promise<()>) {
        let promise_for_panic = promise.clone();
        self.pipeline.propagate_outbound_with(
            self.index,
            promise,
            |h, ctx, promise| h.close(ctx, promise),
            move |panic_payload| {
                promise_for_panic.try_failure(CoreError::from_panic(panic_payload));
            },
        );
    }

    /// Only ever called by the Head context's own `OutboundHandler` impl:
    /// forwards a write straight to the channel's outbound buffer.
    pub(super) fn channel_write_direct(&self, msg: PipelineMessage, promise: Promise<()>) {
        self.pipeline.channel_write_direct(msg, promise);
    }

    pub(super) fn channel_flush_direct(&self) {
        self.pipeline.channel_flush_direct();
    }

    pub(super) fn channel_close_direct(&self, promise: Promise<()>) {
        self.pipeline.channel_close_direct(promise);
    }
}
