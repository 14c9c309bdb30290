//! Future/Promise: a single-assignment completion slot with listeners,
//! cancellation, progress reporting, and aggregation (spec §4.2).
//!
//! `Promise<T>` is the write half; `ChannelFuture<T>` is the read half,
//! clonable, obtained via [`Promise::future`]. Listener callbacks run on
//! the associated executor if one is bound to the promise, otherwise
//! inline on the completer's thread — mirroring Netty's `DefaultPromise`
//! notification rule. The completed value is held behind an `Arc` so that
//! every clone of a future, and every listener, can observe it without
//! requiring `T: Clone`.

mod combiner;
mod flush_notifier;
mod promise;

pub use combiner::PromiseCombiner;
pub use flush_notifier::FlushNotifier;
pub use promise::{ChannelFuture, ChannelFutureListener, Promise, ProgressivePromise};

use std::sync::Arc;

use crate::error::CoreError;

/// The outcome stored in a completed promise.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Completed successfully with a shared reference to the value.
    Success(Arc<T>),
    /// Completed with a failure cause.
    Failure(Arc<CoreError>),
    /// Cancelled before completion.
    Cancelled,
}

impl<T> Outcome<T> {
    /// True iff the outcome is [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// True iff the outcome is [`Outcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    /// The failure cause, if any.
    pub fn cause(&self) -> Option<&Arc<CoreError>> {
        match self {
            Outcome::Failure(c) => Some(c),
            _ => None,
        }
    }
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Outcome::Success(v) => Outcome::Success(Arc::clone(v)),
            Outcome::Failure(c) => Outcome::Failure(Arc::clone(c)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}
