//! Acquire/release lifecycle for reusable channels (spec §4.8 "Pool").

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::channel::Channel;
use crate::error::CoreError;
use crate::future::{ChannelFuture, Promise};

const POOL_ATTRIBUTE_KEY: &str = "ripple.pool.member";

/// Produces a fresh channel when the pool has none to offer (spec §4.8
/// "bootstrap a new one via the configured connector").
pub trait ChannelConnector: Send + Sync {
    /// Connects (or otherwise constructs) a new, already-active channel.
    fn connect(&self) -> ChannelFuture<Arc<Channel>>;
}

/// A LIFO pool of reusable channels bounded to `max_idle` entries.
pub struct ChannelPool {
    connector: Arc<dyn ChannelConnector>,
    idle: Mutex<VecDeque<Arc<Channel>>>,
    max_idle: usize,
}

impl ChannelPool {
    /// Creates a pool backed by `connector`, holding at most `max_idle`
    /// idle channels at once.
    pub fn new(connector: Arc<dyn ChannelConnector>, max_idle: usize) -> Self {
        Self {
            connector,
            idle: Mutex::new(VecDeque::new()),
            max_idle,
        }
    }

    /// Acquires a channel: pops from the idle deque and health-checks it
    /// (`is_active`), retrying on failure; bootstraps a new one via the
    /// connector once the deque is empty.
    pub fn acquire(&self) -> ChannelFuture<Arc<Channel>> {
        loop {
            let candidate = self.idle.lock().pop_back();
            match candidate {
                Some(channel) if channel.is_active() => {
                    channel.set_attribute(POOL_ATTRIBUTE_KEY, true);
                    let promise: Promise<Arc<Channel>> = Promise::new();
                    promise.try_success(channel);
                    return promise.future();
                }
                Some(unhealthy) => {
                    unhealthy.close_forcibly();
                    continue;
                }
                None => return self.connector.connect(),
            }
        }
    }

    /// Releases `channel` back to the pool: detaches the pool attribute,
    /// health-checks, and offers it to the deque. If the deque is full the
    /// channel is closed and the release reported as failed.
    pub fn release(&self, channel: Arc<Channel>) -> Result<(), CoreError> {
        channel.set_attribute(POOL_ATTRIBUTE_KEY, false);
        if !channel.is_active() {
            channel.close_forcibly();
            return Err(CoreError::closed("channel unhealthy at release"));
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.max_idle {
            let current_len = idle.len();
            drop(idle);
            channel.close_forcibly();
            return Err(CoreError::capacity_exceeded(current_len, self.max_idle));
        }
        idle.push_back(channel);
        Ok(())
    }

    /// Idle channels currently held, for diagnostics/tests.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// Lazily creates per-key pools with concurrent get-or-create semantics
/// (spec §4.8 "A pool map lazily creates per-key pools").
///
/// Reads go through [`ArcSwap::load`] and never block a writer; `get_or_create`
/// only takes `create_lock` on the slow path (key not yet present), to
/// serialize factory invocation so two racing callers for the same key can't
/// each construct a pool and hand two different instances to the caller. The
/// map itself is published via `rcu`, so concurrent readers never block on
/// that serialized creation either.
pub struct ChannelPoolMap<K> {
    pools: ArcSwap<HashMap<K, Arc<ChannelPool>>>,
    create_lock: Mutex<()>,
    factory: Box<dyn Fn(&K) -> Arc<ChannelPool> + Send + Sync>,
}

impl<K: std::hash::Hash + Eq + Clone + Send + Sync + 'static> ChannelPoolMap<K> {
    /// Creates a map that builds a new pool for key `k` via `factory` the
    /// first time that key is requested.
    pub fn new(factory: impl Fn(&K) -> Arc<ChannelPool> + Send + Sync + 'static) -> Self {
        Self {
            pools: ArcSwap::from_pointee(HashMap::new()),
            create_lock: Mutex::new(()),
            factory: Box::new(factory),
        }
    }

    /// Returns the pool for `key`, creating it atomically if absent.
    pub fn get_or_create(&self, key: K) -> Arc<ChannelPool> {
        if let Some(pool) = self.pools.load().get(&key) {
            return Arc::clone(pool);
        }

        let _serialize_creation = self.create_lock.lock();
        if let Some(pool) = self.pools.load().get(&key) {
            return Arc::clone(pool);
        }

        let pool = (self.factory)(&key);
        let for_publish = Arc::clone(&pool);
        self.pools.rcu(move |current| {
            let mut next = HashMap::clone(current);
            next.insert(key.clone(), Arc::clone(&for_publish));
            next
        });
        pool
    }

    /// The number of distinct keys with an existing pool.
    pub fn pool_count(&self) -> usize {
        self.pools.load().len()
    }
}
