//! The channel: a nexus to one transport endpoint, owning its pipeline,
//! outbound buffer, and configuration (spec §3 "Channel").

mod options;
mod state;
mod unsafe_ops;

pub use options::{ChannelConfig, WriteBufferWaterMark};
pub use state::ChannelState;

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::ByteBufAllocator;
use crate::error::{CoreError, CoreResult};
use crate::executor::EventLoop;
use crate::future::{ChannelFuture, Promise};
use crate::id::ChannelId;
use crate::outbound::{OutboundBuffer, WritabilityTransition};
use crate::pipeline::{Pipeline, PipelineChannelLink, PipelineMessage};
use crate::recv::RecvByteBufAllocator;

use state::StateCell;
use unsafe_ops::{ChannelUnsafe, LoopbackUnsafe};

/// A nexus to one transport endpoint. Always held behind `Arc<Channel>` —
/// the pipeline keeps a weak back-reference to forward Head's outbound
/// calls, so the cycle is built with [`Arc::new_cyclic`].
pub struct Channel {
    id: ChannelId,
    parent: Option<Arc<Channel>>,
    executor: Arc<dyn EventLoop>,
    config: RwLock<ChannelConfig>,
    state: StateCell,
    pipeline: Pipeline,
    outbound: OutboundBuffer,
    io: Box<dyn ChannelUnsafe>,
    local_addr: RwLock<Option<SocketAddr>>,
    remote_addr: RwLock<Option<SocketAddr>>,
    attributes: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
    close_promise: Promise<()>,
    /// Lets `&self` methods (the `PipelineChannelLink` trait impl) schedule
    /// follow-up work on this same channel, e.g. rescheduling a re-entrant
    /// outbound close onto the executor.
    self_weak: std::sync::Weak<Channel>,
}

impl Channel {
    fn new_with_io(
        executor: Arc<dyn EventLoop>,
        allocator: Arc<dyn ByteBufAllocator>,
        recv_allocator: Arc<dyn RecvByteBufAllocator>,
        parent: Option<Arc<Channel>>,
        io: Box<dyn ChannelUnsafe>,
    ) -> Arc<Channel> {
        let config = ChannelConfig::new(allocator, recv_allocator);
        let water_mark = config.water_mark();
        Arc::new_cyclic(|weak: &std::sync::Weak<Channel>| {
            let link: std::sync::Weak<dyn PipelineChannelLink> =
                weak.clone() as std::sync::Weak<dyn PipelineChannelLink>;
            Channel {
                id: ChannelId::generate(),
                parent,
                executor,
                config: RwLock::new(config),
                state: StateCell::new(),
                pipeline: Pipeline::new(link),
                outbound: OutboundBuffer::new(water_mark.low(), water_mark.high()),
                io,
                local_addr: RwLock::new(None),
                remote_addr: RwLock::new(None),
                attributes: RwLock::new(HashMap::new()),
                close_promise: Promise::new(),
                self_weak: weak.clone(),
            }
        })
    }

    /// Creates a channel with no real transport underneath — writes are
    /// captured in memory instead of reaching a socket. The core's own
    /// `EmbeddedChannel` equivalent, for driving pipeline/outbound-buffer
    /// logic in tests without a real backend.
    pub fn new_embedded(executor: Arc<dyn EventLoop>) -> Arc<Channel> {
        Self::new_with_io(
            executor,
            Arc::new(crate::buffer::UnpooledAllocator),
            Arc::new(crate::recv::FixedRecvByteBufAllocator::new(2048)),
            None,
            Box::new(LoopbackUnsafe::new()),
        )
    }

    /// The channel's globally unique identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The parent channel, for an accepted child (spec §3 "Channel").
    pub fn parent(&self) -> Option<&Arc<Channel>> {
        self.parent.as_ref()
    }

    /// The executor this channel is permanently bound to.
    pub fn executor(&self) -> &Arc<dyn EventLoop> {
        &self.executor
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// `isActive`.
    pub fn is_active(&self) -> bool {
        self.state.get() == ChannelState::Active
    }

    /// `isOpen`: not yet closed.
    pub fn is_open(&self) -> bool {
        self.state.get() != ChannelState::Closed
    }

    /// `isWritable`: derived from the outbound buffer's writability bits,
    /// never from lifecycle state (spec §4.4).
    pub fn is_writable(&self) -> bool {
        self.outbound.is_writable()
    }

    /// The pipeline attached to this channel.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The local address, once bound/connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// The remote address, once connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote_addr.read()
    }

    /// Reads the current configuration snapshot under a shared lock.
    pub fn config(&self) -> parking_lot::RwLockReadGuard<'_, ChannelConfig> {
        self.config.read()
    }

    /// Mutates the configuration under an exclusive lock.
    pub fn config_mut(&self) -> parking_lot::RwLockWriteGuard<'_, ChannelConfig> {
        self.config.write()
    }

    /// Stores an arbitrary attribute keyed by name (spec §5 "the attribute
    /// map is concurrent; attribute values are whatever the user stores").
    pub fn set_attribute<T: Send + Sync + 'static>(&self, key: &str, value: T) {
        self.attributes
            .write()
            .insert(key.to_string(), Box::new(value));
    }

    /// Fetches a previously-stored attribute, if present and of type `T`.
    pub fn attribute<T: Send + Sync + 'static + Clone>(&self, key: &str) -> Option<T> {
        self.attributes
            .read()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Drives the `Unregistered -> Registered` transition.
    pub fn register(self: &Arc<Self>) -> CoreResult<()> {
        self.state
            .transition(ChannelState::Registered)
            .map_err(|_| CoreError::state_violation("cannot register from current state"))?;
        self.pipeline.head_context().fire_channel_registered();
        Ok(())
    }

    /// Drives the `Registered -> Active` transition (bind/connect
    /// success).
    pub fn mark_active(self: &Arc<Self>, local: SocketAddr) -> CoreResult<()> {
        self.io.bind(local)?;
        self.state
            .transition(ChannelState::Active)
            .map_err(|_| CoreError::state_violation("cannot activate from current state"))?;
        *self.local_addr.write() = Some(local);
        self.pipeline.head_context().fire_channel_active();
        Ok(())
    }

    /// Drives the `Registered -> Active` transition via an outbound
    /// connect rather than a bind (spec §3 Channel lifecycle; §4.4
    /// connect-timeout handling lives on top of this).
    pub fn connect(
        self: &Arc<Self>,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> CoreResult<()> {
        self.io.connect(remote, local)?;
        self.state
            .transition(ChannelState::Active)
            .map_err(|_| CoreError::state_violation("cannot activate from current state"))?;
        *self.remote_addr.write() = Some(remote);
        if let Some(local) = local {
            *self.local_addr.write() = Some(local);
        }
        self.pipeline.head_context().fire_channel_active();
        Ok(())
    }

    /// Accepts one pending child connection from a listening channel's
    /// transport, wiring it as a new child `Channel` sharing this
    /// channel's executor and allocator configuration (spec §3 "parent
    /// channel, for accepted children"). Returns `Ok(None)` when nothing is
    /// pending, which is always the case for an embedded/loopback channel.
    pub fn accept(self: &Arc<Self>) -> CoreResult<Option<Arc<Channel>>> {
        let child_io = match self.io.accept()? {
            Some(io) => io,
            None => return Ok(None),
        };
        let (allocator, recv_allocator) = {
            let config = self.config.read();
            (
                Arc::clone(config.allocator()),
                Arc::clone(config.recv_allocator()),
            )
        };
        let child = Self::new_with_io(
            Arc::clone(&self.executor),
            allocator,
            recv_allocator,
            Some(Arc::clone(self)),
            child_io,
        );
        Ok(Some(child))
    }

    /// Delivers one inbound message, starting at Head. Exposed for tests
    /// and for a transport backend that already has a decoded message in
    /// hand; [`Channel::do_read`] is the real read-loop path that drives
    /// this from the wire via the configured recv-allocator.
    pub fn deliver(self: &Arc<Self>, msg: PipelineMessage) {
        self.pipeline.head_context().fire_channel_read(msg);
    }

    /// Signals a read-complete at Head.
    pub fn read_complete(self: &Arc<Self>) {
        self.pipeline.head_context().fire_channel_read_complete();
    }

    /// Drives one read-complete cycle from the underlying transport (spec
    /// §4.7): repeatedly sizes a buffer via the configured recv-allocator,
    /// attempts `io.read`, and delivers each non-empty read inbound, until
    /// the allocator's `continue_reading` predicate says to stop or EOF is
    /// observed, then fires the read-complete event.
    pub fn do_read(self: &Arc<Self>) {
        let (recv_allocator, allocator, max_messages_per_read) = {
            let config = self.config.read();
            (
                Arc::clone(config.recv_allocator()),
                Arc::clone(config.allocator()),
                config.max_messages_per_read(),
            )
        };
        let mut handle = recv_allocator.new_handle();
        let mut messages_read = 0u32;

        loop {
            let guess = handle.guess();
            let mut raw = vec![0u8; guess];
            handle.attempted_bytes_read(guess);
            let read = match self.io.read(&mut raw) {
                Ok(read) => read,
                Err(cause) => {
                    tracing::warn!(%cause, "channel read failed");
                    handle.last_bytes_read(None);
                    break;
                }
            };
            handle.last_bytes_read(read);

            match read {
                Some(n) if n > 0 => {
                    let buf = allocator.io(n, n);
                    buf.write_slice(&raw[..n])
                        .expect("exact-sized buffer never exceeds its own max_capacity");
                    self.deliver(Arc::new(buf));
                    messages_read += 1;
                }
                Some(_) => {}
                None => {
                    let _ = self.mark_inactive();
                }
            }

            if read.is_none() || !handle.continue_reading(max_messages_per_read, messages_read) {
                break;
            }
        }

        self.read_complete();
    }

    /// Drives the `Active -> Inactive` transition (peer close or local
    /// close observed).
    pub fn mark_inactive(self: &Arc<Self>) -> CoreResult<()> {
        self.state
            .transition(ChannelState::Inactive)
            .map_err(|_| CoreError::state_violation("cannot deactivate from current state"))?;
        self.pipeline.head_context().fire_channel_inactive();
        Ok(())
    }

    /// Writes `msg` through the pipeline starting at Tail.
    pub fn write(self: &Arc<Self>, msg: PipelineMessage) -> ChannelFuture<()> {
        let promise = Promise::with_executor(Arc::clone(&self.executor) as Arc<dyn EventLoop>);
        let future = promise.future();
        self.pipeline.write(msg, promise);
        future
    }

    /// Flushes the outbound buffer through the pipeline.
    pub fn flush(self: &Arc<Self>) {
        self.pipeline.flush();
    }

    /// Gracefully closes the channel: fails flushed entries, releases
    /// unflushed ones, transitions through Inactive/Unregistered/Closed.
    pub fn close(self: &Arc<Self>) -> ChannelFuture<()> {
        let cause = CoreError::closed("channel");
        let _ = self.outbound.fail_flushed(cause.duplicate());
        self.close_outbound_with_retry(cause.duplicate(), false);
        let _ = self.mark_inactive();
        let _ = self.state.transition(ChannelState::Unregistered);
        self.pipeline.head_context().fire_channel_unregistered();
        let _ = self.state.transition(ChannelState::Closed);
        self.io.close();
        self.close_promise.try_success(());
        self.close_promise.future()
    }

    /// Drives `OutboundBuffer::close`, absorbing a re-entrant call (a
    /// listener triggered by `fail_flushed`/`close` writing or closing
    /// again before this call returns) by rescheduling itself onto the
    /// executor instead of re-entering the outbound buffer synchronously
    /// (spec §4.6 "close(cause, allowOpenChannel) ... absorbs re-entry by
    /// rescheduling itself on the executor").
    fn close_outbound_with_retry(self: &Arc<Self>, cause: CoreError, allow_open_channel: bool) {
        let retry_channel = Arc::clone(self);
        let retry_cause = cause.duplicate();
        let _ = self.outbound.close(cause, allow_open_channel, move || {
            let executor = Arc::clone(&retry_channel.executor);
            executor.execute(Box::new(move || {
                retry_channel.close_outbound_with_retry(retry_cause, allow_open_channel);
            }));
        });
    }

    /// Bypasses graceful close; may be called from any thread (spec §4.4
    /// "`closeForcibly`").
    pub fn close_forcibly(self: &Arc<Self>) {
        let _ = self.close();
    }

    /// Completes when the channel has fully closed.
    pub fn close_future(&self) -> ChannelFuture<()> {
        self.close_promise.future()
    }

    /// Reaches the concrete [`LoopbackUnsafe`] behind an embedded channel,
    /// for tests driving [`Channel::do_read`] without a real socket.
    #[cfg(test)]
    fn loopback(&self) -> &LoopbackUnsafe {
        self.io
            .as_any()
            .downcast_ref::<LoopbackUnsafe>()
            .expect("not an embedded channel")
    }
}

impl PipelineChannelLink for Channel {
    fn outbound_write(&self, msg: PipelineMessage, promise: Promise<()>) {
        if self.state.get() == ChannelState::Closed {
            promise.try_failure(CoreError::closed("channel"));
            return;
        }
        let transition = self.outbound.add_message(msg, promise);
        self.notify_writability(transition);
    }

    fn outbound_flush(&self) {
        self.outbound.add_flush();
        let spin_count = self.config.read().write_spin_count();
        for _ in 0..spin_count {
            let wrote = self.outbound.with_nio_buffers(16, 64 * 1024, |slices| {
                if slices.is_empty() {
                    return None;
                }
                self.io.write(slices).ok()
            });
            match wrote {
                Some(0) | None => break,
                Some(n) => {
                    if self.outbound.remove_bytes(n).is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn outbound_close(&self, promise: Promise<()>) {
        let cause = CoreError::closed("channel");
        let _ = self.outbound.fail_flushed(cause.duplicate());
        if let Some(channel) = self.self_weak.upgrade() {
            channel.close_outbound_with_retry(cause, false);
        }
        promise.try_success(());
    }
}

impl Channel {
    fn notify_writability(&self, transition: WritabilityTransition) {
        match transition {
            WritabilityTransition::Unchanged => {}
            WritabilityTransition::BecameWritable => self
                .pipeline
                .head_context()
                .fire_channel_writability_changed(true),
            WritabilityTransition::BecameUnwritable => self
                .pipeline
                .head_context()
                .fire_channel_writability_changed(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SingleThreadEventLoop;

    fn new_test_channel() -> Arc<Channel> {
        let executor: Arc<dyn EventLoop> = SingleThreadEventLoop::spawn("test");
        Channel::new_embedded(executor)
    }

    #[test]
    fn lifecycle_follows_the_documented_transitions() {
        let channel = new_test_channel();
        assert_eq!(channel.state(), ChannelState::Unregistered);
        channel.register().unwrap();
        assert_eq!(channel.state(), ChannelState::Registered);
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();
        assert!(channel.is_active());
    }

    #[test]
    fn write_then_flush_reaches_the_embedded_transport() {
        let channel = new_test_channel();
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();

        let buf = Arc::new(crate::buffer::ByteBuf::new(4, 4));
        buf.write_slice(b"data").unwrap();
        let future = channel.write(buf);
        channel.flush();
        assert!(future.outcome().unwrap().is_success());
    }

    #[test]
    fn do_read_drives_the_recv_allocator_and_delivers_inbound_data() {
        use crate::pipeline::{HandlerContext, InboundHandler, OutboundHandler, PipelineMessage};
        use std::sync::Mutex as StdMutex;

        struct Capture(Arc<StdMutex<Vec<u8>>>);
        impl InboundHandler for Capture {
            fn channel_read(&self, _ctx: &HandlerContext, msg: PipelineMessage) {
                msg.with_readable(|s| self.0.lock().unwrap().extend_from_slice(s));
            }
        }
        impl OutboundHandler for Capture {}

        let channel = new_test_channel();
        let captured = Arc::new(StdMutex::new(Vec::new()));
        channel
            .pipeline()
            .add_last("capture", Capture(Arc::clone(&captured)))
            .unwrap();
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();

        channel.loopback().queue_readable(b"hello");
        channel.do_read();

        assert_eq!(&*captured.lock().unwrap(), b"hello");
    }

    #[test]
    fn do_read_marks_inactive_on_eof() {
        let channel = new_test_channel();
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();

        channel.loopback().signal_eof();
        channel.do_read();

        assert_eq!(channel.state(), ChannelState::Inactive);
    }

    #[test]
    fn accept_reports_nothing_pending_for_an_embedded_channel() {
        let channel = new_test_channel();
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();
        assert!(channel.accept().unwrap().is_none());
    }

    #[test]
    fn close_transitions_to_closed_and_completes_close_future() {
        let channel = new_test_channel();
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.close_future().outcome().unwrap().is_success());
    }
}
