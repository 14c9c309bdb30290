//! The handler chain itself: a synthetic Head and Tail bracketing a
//! dynamically mutable run of user handlers (spec §4.5).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::future::Promise;

use super::context::{HandlerContext, Node};
use super::handler::{HeadHandler, InboundHandler, OutboundHandler, PipelineMessage, TailHandler};

/// The narrow interface the pipeline uses to reach back into its owning
/// channel — only the Head context's outbound handler calls through this,
/// never user handlers (spec §9 "`Unsafe` inner contract": kept separate
/// from the user-facing handler API).
pub(crate) trait PipelineChannelLink: Send + Sync {
    fn outbound_write(&self, msg: PipelineMessage, promise: Promise<()>);
    fn outbound_flush(&self);
    fn outbound_close(&self, promise: Promise<()>);
}

pub(super) struct PipelineInner {
    pub(super) nodes: Mutex<Vec<Node>>,
    head: usize,
    tail: usize,
    channel: Weak<dyn PipelineChannelLink>,
}

/// The pipeline itself: an owning handle over the context arena. Cloning
/// shares the same arena (it is cheap, `Arc`-backed), matching how a
/// channel's single pipeline instance is referenced from many contexts.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Creates a pipeline with only Head and Tail, bound to `channel` for
    /// the Head's direct outbound forwarding.
    pub(crate) fn new(channel: Weak<dyn PipelineChannelLink>) -> Self {
        let head = Node {
            name: "head".to_string(),
            inbound: Some(Arc::new(HeadHandler)),
            outbound: Some(Arc::new(HeadHandler)),
            prev: None,
            next: Some(1),
            removed: false,
        };
        let tail = Node {
            name: "tail".to_string(),
            inbound: Some(Arc::new(TailHandler)),
            outbound: None,
            prev: Some(0),
            next: None,
            removed: false,
        };
        Self {
            inner: Arc::new(PipelineInner {
                nodes: Mutex::new(vec![head, tail]),
                head: 0,
                tail: 1,
                channel,
            }),
        }
    }

    /// The context addressing Head, for kicking off inbound events from
    /// the channel.
    pub fn head_context(&self) -> HandlerContext {
        HandlerContext {
            pipeline: Arc::clone(&self.inner),
            index: self.inner.head,
        }
    }

    /// The context addressing Tail, for kicking off outbound requests from
    /// user code that writes directly against the pipeline.
    pub fn tail_context(&self) -> HandlerContext {
        HandlerContext {
            pipeline: Arc::clone(&self.inner),
            index: self.inner.tail,
        }
    }

    /// Writes `msg` starting from Tail, propagating toward Head.
    pub fn write(&self, msg: PipelineMessage, promise: Promise<()>) {
        self.tail_context().write(msg, promise);
    }

    /// Flushes starting from Tail.
    pub fn flush(&self) {
        self.tail_context().flush();
    }

    /// Inserts `handler` at the front of the user-handler run (right after
    /// Head).
    pub fn add_first<H>(&self, name: impl Into<String>, handler: H) -> CoreResult<()>
    where
        H: InboundHandler + OutboundHandler + 'static,
    {
        self.insert_after(self.inner.head, name.into(), handler)
    }

    /// Inserts `handler` at the back of the user-handler run (right before
    /// Tail).
    pub fn add_last<H>(&self, name: impl Into<String>, handler: H) -> CoreResult<()>
    where
        H: InboundHandler + OutboundHandler + 'static,
    {
        let before_tail = self.inner.nodes.lock()[self.inner.tail]
            .prev
            .expect("tail always has a predecessor");
        self.insert_after(before_tail, name.into(), handler)
    }

    /// Inserts `handler` immediately before the context named `target`.
    pub fn add_before<H>(&self, target: &str, name: impl Into<String>, handler: H) -> CoreResult<()>
    where
        H: InboundHandler + OutboundHandler + 'static,
    {
        let target_idx = self.find(target)?;
        let prev = self.inner.nodes.lock()[target_idx]
            .prev
            .expect("target is never Head");
        self.insert_after(prev, name.into(), handler)
    }

    /// Inserts `handler` immediately after the context named `target`.
    pub fn add_after<H>(&self, target: &str, name: impl Into<String>, handler: H) -> CoreResult<()>
    where
        H: InboundHandler + OutboundHandler + 'static,
    {
        let target_idx = self.find(target)?;
        self.insert_after(target_idx, name.into(), handler)
    }

    /// Removes the context named `name`, firing `handler_removed` and
    /// splicing its neighbors together.
    pub fn remove(&self, name: &str) -> CoreResult<()> {
        let idx = self.find(name)?;
        let (inbound, outbound, prev, next) = {
            let mut nodes = self.inner.nodes.lock();
            let (prev, next) = (nodes[idx].prev, nodes[idx].next);
            if let Some(p) = prev {
                nodes[p].next = next;
            }
            if let Some(n) = next {
                nodes[n].prev = prev;
            }
            nodes[idx].removed = true;
            (
                nodes[idx].inbound.clone(),
                nodes[idx].outbound.clone(),
                prev,
                next,
            )
        };
        let ctx = HandlerContext {
            pipeline: Arc::clone(&self.inner),
            index: idx,
        };
        if let Some(handler) = &inbound {
            handler.handler_removed(&ctx);
        }
        if let Some(handler) = &outbound {
            handler.handler_removed(&ctx);
        }
        let _ = (prev, next);
        Ok(())
    }

    /// Replaces the context named `name` with `handler`, preserving its
    /// position.
    pub fn replace<H>(&self, name: &str, new_name: impl Into<String>, handler: H) -> CoreResult<()>
    where
        H: InboundHandler + OutboundHandler + 'static,
    {
        let idx = self.find(name)?;
        let prev = self.inner.nodes.lock()[idx]
            .prev
            .expect("target is never Head");
        self.remove(name)?;
        self.insert_after(prev, new_name.into(), handler)
    }

    fn find(&self, name: &str) -> CoreResult<usize> {
        let nodes = self.inner.nodes.lock();
        nodes
            .iter()
            .position(|n| !n.removed && n.name == name)
            .ok_or_else(|| CoreError::closed("handler context not found"))
    }

    fn insert_after<H>(&self, after: usize, name: String, handler: H) -> CoreResult<()>
    where
        H: InboundHandler + OutboundHandler + 'static,
    {
        let handler = Arc::new(handler);
        let new_idx;
        {
            let mut nodes = self.inner.nodes.lock();
            if nodes.iter().any(|n| !n.removed && n.name == name) {
                return Err(CoreError::state_violation("duplicate handler name"));
            }
            let next = nodes[after].next;
            new_idx = nodes.len();
            nodes.push(Node {
                name,
                inbound: Some(handler.clone() as Arc<dyn InboundHandler>),
                outbound: Some(handler.clone() as Arc<dyn OutboundHandler>),
                prev: Some(after),
                next,
                removed: false,
            });
            nodes[after].next = Some(new_idx);
            if let Some(n) = next {
                nodes[n].prev = Some(new_idx);
            }
        }
        let ctx = HandlerContext {
            pipeline: Arc::clone(&self.inner),
            index: new_idx,
        };
        InboundHandler::handler_added(&*handler, &ctx);
        OutboundHandler::handler_added(&*handler, &ctx);
        Ok(())
    }
}

impl PipelineInner {
    pub(super) fn propagate_inbound(
        self: &Arc<Self>,
        from: usize,
        f: impl FnOnce(&dyn InboundHandler, &HandlerContext),
    ) {
        self.propagate_inbound_with(from, (), |h, ctx, ()| f(h, ctx));
    }

    pub(super) fn propagate_inbound_with<T>(
        self: &Arc<Self>,
        from: usize,
        payload: T,
        f: impl FnOnce(&dyn InboundHandler, &HandlerContext, T),
    ) {
        let mut current = from;
        loop {
            let next = self.nodes.lock()[current].next;
            let Some(next_idx) = next else { return };
            let handler = {
                let nodes = self.nodes.lock();
                if nodes[next_idx].removed {
                    None
                } else {
                    nodes[next_idx].inbound.clone()
                }
            };
            match handler {
                Some(handler) => {
                    let ctx = HandlerContext {
                        pipeline: Arc::clone(self),
                        index: next_idx,
                    };
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        f(&*handler, &ctx, payload)
                    }));
                    if let Err(panic_payload) = outcome {
                        ctx.fire_exception_caught(CoreError::from_panic(panic_payload));
                    }
                    return;
                }
                None => current = next_idx,
            }
        }
    }

    pub(super) fn propagate_outbound(
        self: &Arc<Self>,
        from: usize,
        f: impl FnOnce(&dyn OutboundHandler, &HandlerContext),
    ) {
        self.propagate_outbound_with(from, (), |h, ctx, ()| f(h, ctx), |panic_payload| {
            tracing::error!(
                cause = %CoreError::from_panic(panic_payload),
                "outbound handler panicked with no promise to fail"
            );
        });
    }

    /// `on_panic` lets each outbound call site (`write`/`close` have a
    /// promise to fail; `flush` only has logs) decide how to surface a
    /// handler panic, since `propagate_outbound_with` itself has no
    /// `exceptionCaught`-style inbound counterpart to re-raise on.
    pub(super) fn propagate_outbound_with<T>(
        self: &Arc<Self>,
        from: usize,
        payload: T,
        f: impl FnOnce(&dyn OutboundHandler, &HandlerContext, T),
        on_panic: impl FnOnce(Box<dyn std::any::Any + Send>),
    ) {
        let mut current = from;
        loop {
            let prev = self.nodes.lock()[current].prev;
            let Some(prev_idx) = prev else { return };
            let handler = {
                let nodes = self.nodes.lock();
                if nodes[prev_idx].removed {
                    None
                } else {
                    nodes[prev_idx].outbound.clone()
                }
            };
            match handler {
                Some(handler) => {
                    let ctx = HandlerContext {
                        pipeline: Arc::clone(self),
                        index: prev_idx,
                    };
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        f(&*handler, &ctx, payload)
                    }));
                    if let Err(panic_payload) = outcome {
                        on_panic(panic_payload);
                    }
                    return;
                }
                None => current = prev_idx,
            }
        }
    }

    pub(super) fn channel_write_direct(&self, msg: PipelineMessage, promise: Promise<()>) {
        match self.channel.upgrade() {
            Some(channel) => channel.outbound_write(msg, promise),
            None => {
                promise.try_failure(CoreError::closed("channel"));
            }
        }
    }

    pub(super) fn channel_flush_direct(&self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.outbound_flush();
        }
    }

    pub(super) fn channel_close_direct(&self, promise: Promise<()>) {
        match self.channel.upgrade() {
            Some(channel) => channel.outbound_close(promise),
            None => {
                promise.try_failure(CoreError::closed("channel"));
            }
        }
    }
}
