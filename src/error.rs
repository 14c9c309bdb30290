//! Stable error taxonomy shared by every module in the transport core.
//!
//! Every variant corresponds to one of the seven categories in the error
//! handling design: invalid reference count, capacity exceeded, closed
//! resource, cancelled, timeout, I/O failure, protocol/state violation.
//! Reference-count mistakes are programmer errors and are always returned
//! as errors rather than panicking, so a caller that wants Netty's "throw"
//! behavior can `.expect()` at the boundary.

use std::io;

use crate::id::ChannelId;

/// The crate-wide result alias.
pub type CoreResult<T> = Result<T, CoreError>;

/// The stable error domain for the transport core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// `retain` observed a count `<= 0` or overflowing, or `release` would
    /// drop the count below zero.
    #[error("invalid reference count: {detail}")]
    InvalidRefCount {
        /// What went wrong (e.g. "retain on count=0", "release below zero").
        detail: &'static str,
    },

    /// A buffer was asked to grow past its `max_capacity`, or an outbound
    /// entry was rejected because a bounded pool is full.
    #[error("capacity exceeded: requested {requested}, limit {limit}")]
    CapacityExceeded {
        /// Bytes (or slots) requested.
        requested: usize,
        /// The configured ceiling.
        limit: usize,
    },

    /// The operation targets a channel, buffer, or executor that has
    /// already been closed/released/terminated.
    #[error("operation on closed resource: {resource}")]
    Closed {
        /// A short description of which resource was closed.
        resource: &'static str,
    },

    /// A future/promise cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// A connect attempt or user-scheduled deadline elapsed.
    #[error("timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time before the deadline was declared.
        elapsed_ms: u64,
    },

    /// A transport-level error bubbled up with its OS cause attached.
    #[error("i/o failure on channel {channel:?}")]
    Io {
        /// The channel the failure was observed on, if known.
        channel: Option<ChannelId>,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A protocol or state-machine invariant was violated (e.g. `finish`
    /// called twice on a combiner, `setSuccess` on an already-completed
    /// promise).
    #[error("state violation: {detail}")]
    StateViolation {
        /// What invariant was violated.
        detail: &'static str,
    },

    /// A handler callback panicked instead of returning normally (spec §4.5
    /// "a handler throws"); caught at the pipeline propagation boundary and
    /// converted into this error rather than unwinding through the event
    /// loop.
    #[error("handler panicked: {message}")]
    HandlerPanic {
        /// The panic payload's message, where recoverable.
        message: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidRefCount`].
    pub fn invalid_refcount(detail: &'static str) -> Self {
        CoreError::InvalidRefCount { detail }
    }

    /// Shorthand for [`CoreError::CapacityExceeded`].
    pub fn capacity_exceeded(requested: usize, limit: usize) -> Self {
        CoreError::CapacityExceeded { requested, limit }
    }

    /// Shorthand for [`CoreError::Closed`].
    pub fn closed(resource: &'static str) -> Self {
        CoreError::Closed { resource }
    }

    /// Shorthand for [`CoreError::StateViolation`].
    pub fn state_violation(detail: &'static str) -> Self {
        CoreError::StateViolation { detail }
    }

    /// Builds a [`CoreError::HandlerPanic`] from a caught
    /// [`std::panic::catch_unwind`] payload, recovering a message when the
    /// panic carried a `&str` or `String` (the two payload shapes
    /// `panic!`/`assert!` actually produce).
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            text.to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "handler panicked with a non-string payload".to_string()
        };
        CoreError::HandlerPanic { message }
    }

    /// True iff this error represents a cancellation, matching Netty's
    /// `Future.isCancelled()` query surfaced as a predicate on the cause.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    /// Clones the error, reconstructing `Io`'s non-`Clone` `io::Error` by
    /// kind and message. Used wherever one failure must be reported to more
    /// than one listener (fan-out writes, group aggregation).
    pub fn duplicate(&self) -> Self {
        match self {
            CoreError::InvalidRefCount { detail } => CoreError::InvalidRefCount { detail },
            CoreError::CapacityExceeded { requested, limit } => CoreError::CapacityExceeded {
                requested: *requested,
                limit: *limit,
            },
            CoreError::Closed { resource } => CoreError::Closed { resource },
            CoreError::Cancelled => CoreError::Cancelled,
            CoreError::Timeout { elapsed_ms } => CoreError::Timeout {
                elapsed_ms: *elapsed_ms,
            },
            CoreError::Io { channel, source } => CoreError::Io {
                channel: *channel,
                source: io::Error::new(source.kind(), source.to_string()),
            },
            CoreError::StateViolation { detail } => CoreError::StateViolation { detail },
            CoreError::HandlerPanic { message } => CoreError::HandlerPanic {
                message: message.clone(),
            },
        }
    }
}
