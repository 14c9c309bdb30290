//! Integration tests for the literal boundary scenarios: watermark
//! crossing, ordered pipeline propagation with an exception, a cancelled
//! flushed write, multi-entry gather, promise combiner aggregation, and a
//! pool acquire/release/bootstrap cycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ripple_core::buffer::ByteBuf;
use ripple_core::channel::Channel;
use ripple_core::error::CoreError;
use ripple_core::executor::{EventLoop, SingleThreadEventLoop};
use ripple_core::future::{ChannelFuture, Promise, PromiseCombiner};
use ripple_core::outbound::OutboundBuffer;
use ripple_core::pipeline::{HandlerContext, InboundHandler, OutboundHandler, PipelineMessage};
use ripple_core::pool::{ChannelConnector, ChannelPool};

fn buf_with(bytes: &[u8]) -> Arc<ByteBuf> {
    let buf = Arc::new(ByteBuf::new(bytes.len().max(1), bytes.len().max(1)));
    buf.write_slice(bytes).unwrap();
    buf
}

#[test]
fn watermark_crossing_fires_exactly_one_event_each_way() {
    // Watermarks sized against `ENTRY_OVERHEAD` (96 bytes/entry), not the
    // raw payload sizes, since every entry's accounting is bytes + overhead.
    let outbound = OutboundBuffer::new(120, 200);

    let t1 = outbound.add_message(buf_with(&[0u8; 50]), Promise::new());
    assert_eq!(t1, ripple_core::outbound::WritabilityTransition::Unchanged);
    assert!(outbound.is_writable());

    let t2 = outbound.add_message(buf_with(&[0u8; 20]), Promise::new());
    assert_eq!(
        t2,
        ripple_core::outbound::WritabilityTransition::BecameUnwritable
    );
    assert!(!outbound.is_writable());

    outbound.add_flush();
    assert!(outbound.remove().unwrap(), "draining below low should flip writability exactly once");
    assert!(outbound.is_writable());
}

struct RecordingHandler {
    name: &'static str,
    log: Arc<std::sync::Mutex<Vec<String>>>,
    throw: bool,
}

impl InboundHandler for RecordingHandler {
    fn channel_read(&self, ctx: &HandlerContext, msg: PipelineMessage) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}.channelRead", self.name));
        if self.throw {
            panic!("boom");
        } else {
            ctx.fire_channel_read(msg);
        }
    }

    fn exception_caught(&self, ctx: &HandlerContext, cause: CoreError) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}.exceptionCaught", self.name));
        ctx.fire_exception_caught(cause);
    }
}

impl OutboundHandler for RecordingHandler {}

fn new_channel() -> Arc<Channel> {
    let executor: Arc<dyn EventLoop> = SingleThreadEventLoop::spawn("boundary-test");
    let channel = Channel::new_embedded(executor);
    channel.register().unwrap();
    channel
        .mark_active("127.0.0.1:0".parse().unwrap())
        .unwrap();
    channel
}

#[test]
fn ordered_pipeline_propagates_read_then_reroutes_on_exception() {
    let channel = new_channel();
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    for (name, throw) in [("A", false), ("B", true), ("C", false)] {
        channel
            .pipeline()
            .add_last(
                name,
                RecordingHandler {
                    name,
                    log: Arc::clone(&log),
                    throw,
                },
            )
            .unwrap();
    }

    channel.deliver(buf_with(b"payload"));

    let observed = log.lock().unwrap().clone();
    assert_eq!(observed, vec!["A.channelRead", "B.channelRead", "C.exceptionCaught"]);
}

#[test]
fn cancelled_flushed_entry_frees_bytes_but_does_not_succeed() {
    let outbound = OutboundBuffer::new(1024, 2048);
    let promise: Promise<()> = Promise::new();
    let future = promise.future();

    outbound.add_message(buf_with(&[0u8; 10]), promise.clone());
    outbound.add_flush();
    assert!(outbound.cancel_unflushed(&promise));
    outbound.remove().unwrap();

    assert_eq!(outbound.total_pending_bytes(), 0);
    assert!(future.outcome().unwrap().is_cancelled());
}

#[test]
fn multi_buffer_gather_respects_count_and_byte_limits() {
    let outbound = OutboundBuffer::new(1 << 20, 1 << 20);
    for len in [1024usize, 2048, 512, 4096] {
        outbound.add_message(buf_with(&vec![0u8; len]), Promise::new());
    }
    outbound.add_flush();

    let total = outbound.with_nio_buffers(2, 2000, |slices| {
        assert_eq!(slices.len(), 2);
        assert!(slices[0].len() == 1024);
        slices.iter().map(|s| s.len()).sum::<usize>()
    });
    assert!((1024..=2048).contains(&total));

    outbound.remove_bytes(1024).unwrap();
    let remaining = outbound.current().unwrap();
    assert_eq!(remaining.readable_bytes(), 2048);
}

#[test]
fn combiner_fails_aggregate_with_the_one_actual_failure() {
    let combiner = PromiseCombiner::new();
    let p1: Promise<()> = Promise::new();
    let p2: Promise<()> = Promise::new();
    let p3: Promise<()> = Promise::new();

    combiner.add(p1.future()).unwrap();
    combiner.add(p2.future()).unwrap();
    combiner.add(p3.future()).unwrap();
    combiner.finish();

    p1.try_success(());
    p2.try_failure(CoreError::state_violation("X"));
    p3.try_success(());

    let outcome = combiner.aggregate_future().sync();
    assert!(outcome.is_err());

    let combiner_ok = PromiseCombiner::new();
    let a: Promise<()> = Promise::new();
    let b: Promise<()> = Promise::new();
    combiner_ok.add(a.future()).unwrap();
    combiner_ok.add(b.future()).unwrap();
    combiner_ok.finish();
    a.try_success(());
    b.try_success(());
    assert!(combiner_ok.aggregate_future().sync().is_ok());
}

struct CountingConnector {
    executor: Arc<dyn EventLoop>,
    bootstraps: Arc<AtomicUsize>,
}

impl ChannelConnector for CountingConnector {
    fn connect(&self) -> ChannelFuture<Arc<Channel>> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        let channel = Channel::new_embedded(Arc::clone(&self.executor));
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();
        let promise: Promise<Arc<Channel>> = Promise::new();
        promise.try_success(channel);
        promise.future()
    }
}

#[test]
fn pool_reuses_a_healthy_channel_but_bootstraps_after_it_closes() {
    let executor: Arc<dyn EventLoop> = SingleThreadEventLoop::spawn("pool-boundary");
    let bootstraps = Arc::new(AtomicUsize::new(0));
    let pool = ChannelPool::new(
        Arc::new(CountingConnector {
            executor,
            bootstraps: Arc::clone(&bootstraps),
        }),
        4,
    );

    let first: Arc<Channel> = (*pool.acquire().sync().unwrap()).clone();
    assert_eq!(bootstraps.load(Ordering::SeqCst), 1);
    let id = first.id();
    pool.release(Arc::clone(&first)).unwrap();

    let reacquired: Arc<Channel> = (*pool.acquire().sync().unwrap()).clone();
    assert_eq!(reacquired.id(), id);
    assert_eq!(bootstraps.load(Ordering::SeqCst), 1);

    reacquired.close_forcibly();
    pool.release(Arc::clone(&reacquired)).ok();

    let fresh: Arc<Channel> = (*pool.acquire().sync().unwrap()).clone();
    assert_ne!(fresh.id(), id);
    assert_eq!(bootstraps.load(Ordering::SeqCst), 2);
}
