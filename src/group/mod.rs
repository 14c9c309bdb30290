//! A thread-safe set of channels supporting bulk operations with an
//! aggregate outcome (spec §4.8 "Group").

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{ByteBuf, Duplicate};
use crate::channel::Channel;
use crate::error::CoreError;
use crate::future::{ChannelFuture, Promise};
use crate::id::ChannelId;

/// How an aggregate bulk operation across a group resolved.
///
/// `Partial` covers the mixed case; whether the caller should treat that as
/// primarily a success or a failure is not this enum's call to make — see
/// [`GroupCompletion::is_partial_success`] and
/// [`GroupCompletion::is_partial_failure`], which are independent booleans
/// (both true whenever the outcome is `Partial`), not a forced pick between
/// the two the way a single tie-broken variant would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Every channel succeeded.
    Success,
    /// At least one channel succeeded and at least one failed.
    Partial,
    /// Every channel failed, or the group was empty.
    Failure,
}

/// The result of one bulk operation: per-channel successes and failures.
pub struct GroupCompletion {
    total: usize,
    succeeded: Vec<ChannelId>,
    failed: Vec<(ChannelId, CoreError)>,
}

impl GroupCompletion {
    /// The aggregate verdict (spec §4.8 "distinguishes success /
    /// partialSuccess / partialFailure / failure").
    pub fn outcome(&self) -> GroupOutcome {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (false, true) => GroupOutcome::Success,
            (true, false) | (true, true) => GroupOutcome::Failure,
            (false, false) => GroupOutcome::Partial,
        }
    }

    /// True iff at least one channel succeeded. Independent of
    /// [`GroupCompletion::is_partial_failure`]; both can be true at once
    /// (spec §4.8 — partial success and partial failure are not mutually
    /// exclusive).
    pub fn is_partial_success(&self) -> bool {
        !self.succeeded.is_empty()
    }

    /// True iff at least one channel failed. Independent of
    /// [`GroupCompletion::is_partial_success`].
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Total channels the operation was attempted against.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Channels that succeeded.
    pub fn succeeded(&self) -> &[ChannelId] {
        &self.succeeded
    }

    /// Channels that failed, with their cause.
    pub fn failed(&self) -> &[(ChannelId, CoreError)] {
        &self.failed
    }
}

struct Aggregator {
    remaining: AtomicUsize,
    state: Mutex<GroupCompletion>,
    promise: Promise<GroupCompletion>,
}

impl Aggregator {
    fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(total),
            state: Mutex::new(GroupCompletion {
                total,
                succeeded: Vec::new(),
                failed: Vec::new(),
            }),
            promise: Promise::new(),
        })
    }

    fn record(&self, id: ChannelId, result: Result<(), CoreError>) {
        {
            let mut state = self.state.lock();
            match result {
                Ok(()) => state.succeeded.push(id),
                Err(cause) => state.failed.push((id, cause)),
            }
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let completion = {
                let state = self.state.lock();
                GroupCompletion {
                    total: state.total,
                    succeeded: state.succeeded.clone(),
                    failed: state
                        .failed
                        .iter()
                        .map(|(id, cause)| (*id, cause.duplicate()))
                        .collect(),
                }
            };
            self.promise.try_success(completion);
        }
    }
}

/// A named, thread-safe set of channels.
pub struct ChannelGroup {
    name: String,
    channels: Mutex<HashMap<ChannelId, Arc<Channel>>>,
}

impl ChannelGroup {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// The group's name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `channel`, returning `true` iff it was not already a member.
    pub fn add(&self, channel: Arc<Channel>) -> bool {
        self.channels.lock().insert(channel.id(), channel).is_none()
    }

    /// Removes the channel with `id`, returning `true` iff it was a
    /// member.
    pub fn remove(&self, id: ChannelId) -> bool {
        self.channels.lock().remove(&id).is_some()
    }

    /// The number of member channels.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// True iff the group has no members.
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Writes an independent duplicate of `msg` to every member matching
    /// `predicate`, not flushing. Reference-counted messages are
    /// duplicated once per recipient so each gets its own view (spec §4.8).
    pub fn write_all(
        &self,
        msg: &Arc<ByteBuf>,
        predicate: impl Fn(&Channel) -> bool,
    ) -> ChannelFuture<GroupCompletion> {
        self.bulk(predicate, |channel| {
            let duplicate = Arc::new(msg.duplicate());
            channel.write(duplicate)
        })
    }

    /// As [`ChannelGroup::write_all`], then flushes every matching member.
    pub fn write_and_flush_all(
        &self,
        msg: &Arc<ByteBuf>,
        predicate: impl Fn(&Channel) -> bool,
    ) -> ChannelFuture<GroupCompletion> {
        let future = self.write_all(msg, &predicate);
        for channel in self.matching(&predicate) {
            channel.flush();
        }
        future
    }

    /// Closes every matching member.
    pub fn close_all(&self, predicate: impl Fn(&Channel) -> bool) -> ChannelFuture<GroupCompletion> {
        self.bulk(predicate, |channel| channel.close())
    }

    fn matching(&self, predicate: impl Fn(&Channel) -> bool) -> Vec<Arc<Channel>> {
        self.channels
            .lock()
            .values()
            .filter(|c| predicate(c))
            .cloned()
            .collect()
    }

    fn bulk(
        &self,
        predicate: impl Fn(&Channel) -> bool,
        op: impl Fn(&Arc<Channel>) -> ChannelFuture<()>,
    ) -> ChannelFuture<GroupCompletion> {
        let members = self.matching(predicate);
        let aggregator = Aggregator::new(members.len());
        if members.is_empty() {
            aggregator.promise.try_success(GroupCompletion {
                total: 0,
                succeeded: Vec::new(),
                failed: Vec::new(),
            });
        }
        for channel in members {
            let id = channel.id();
            let aggregator = Arc::clone(&aggregator);
            let future = op(&channel);
            future.on_complete(move |outcome| {
                let result = match outcome {
                    crate::future::Outcome::Success(_) => Ok(()),
                    crate::future::Outcome::Failure(cause) => Err(cause.duplicate()),
                    crate::future::Outcome::Cancelled => Err(CoreError::Cancelled),
                };
                aggregator.record(id, result);
            });
        }
        aggregator.promise.future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{EventLoop, SingleThreadEventLoop};

    fn new_channel() -> Arc<Channel> {
        let executor: Arc<dyn EventLoop> = SingleThreadEventLoop::spawn("group-test");
        let channel = Channel::new_embedded(executor);
        channel.register().unwrap();
        channel
            .mark_active("127.0.0.1:0".parse().unwrap())
            .unwrap();
        channel
    }

    #[test]
    fn write_all_duplicates_per_recipient_and_reports_success() {
        let group = ChannelGroup::new("test-group");
        group.add(new_channel());
        group.add(new_channel());

        let msg = Arc::new(ByteBuf::new(4, 4));
        msg.write_slice(b"data").unwrap();
        let future = group.write_and_flush_all(&msg, |_| true);
        let completion = future.sync().unwrap();
        assert_eq!(completion.outcome(), GroupOutcome::Success);
        assert_eq!(completion.total(), 2);
        // The original message was never consumed by the group itself.
        assert_eq!(msg.readable_bytes(), 4);
    }

    #[test]
    fn close_all_reports_the_right_count() {
        let group = ChannelGroup::new("test-group");
        group.add(new_channel());
        let future = group.close_all(|_| true);
        let completion = future.sync().unwrap();
        assert_eq!(completion.total(), 1);
        assert_eq!(completion.outcome(), GroupOutcome::Success);
    }
}
