//! The ways a work unit can resolve without a user value.

use std::{error::Error, fmt};

/// The value/error pair returned by a work function.
///
/// The error side carries whatever the work function failed with; the pool
/// passes it through to the unit's outcome verbatim, wrapped in
/// [`PoolError::User`].
pub type WorkResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Upper bound on the captured stack trace embedded in a [`Recovery`].
const TRACE_LIMIT: usize = 7_000;

/// Error attached to a [`WorkUnit`][crate::WorkUnit] that did not produce a
/// user value.
///
/// Every variant is delivered through the unit that caused it; errors never
/// propagate across units.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool had already been closed when the unit was admitted, or the
    /// unit was still queued when [`Pool::close`][crate::Pool::close] drained
    /// the dispatch channel.
    #[error("pool is closed, work unit rejected")]
    Closed,

    /// The unit was cancelled before a worker began executing it, either by
    /// [`WorkUnit::cancel`][crate::WorkUnit::cancel] or by a pool-wide
    /// [`Pool::cancel`][crate::Pool::cancel] draining the queue.
    #[error("work unit cancelled")]
    Cancelled,

    /// The work function panicked. The worker recovered, reported the panic
    /// through this error, and was replaced; the pool keeps running.
    #[error("{0}")]
    Recovered(Recovery),

    /// The error the work function returned, passed through verbatim.
    #[error("{0}")]
    User(Box<dyn Error + Send + Sync>),
}

/// Details of a panic a worker recovered from.
#[derive(Debug)]
pub struct Recovery {
    cause: String,
    trace: String,
}

impl Recovery {
    /// Records `cause` together with a stack trace of the recovering worker,
    /// truncated to `TRACE_LIMIT` bytes.
    pub(crate) fn capture(cause: String) -> Self {
        let mut trace = std::backtrace::Backtrace::force_capture().to_string();
        if trace.len() > TRACE_LIMIT {
            let mut end = TRACE_LIMIT;
            while !trace.is_char_boundary(end) {
                end -= 1;
            }
            trace.truncate(end);
        }
        Self { cause, trace }
    }

    /// The panic payload's message.
    pub fn cause(&self) -> &str {
        &self.cause
    }

    /// The captured stack trace, at most 7 000 bytes.
    pub fn trace(&self) -> &str {
        &self.trace
    }
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed due to a recoverable error: {}\nstack trace:\n{}",
            self.cause, self.trace
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_message_prefix() {
        let err = PoolError::Recovered(Recovery::capture("boom".into()));
        assert!(err
            .to_string()
            .starts_with("failed due to a recoverable error: boom"));
    }

    #[test]
    fn recovery_trace_is_bounded() {
        let recovery = Recovery::capture("boom".into());
        assert!(recovery.trace().len() <= TRACE_LIMIT);
    }

    #[test]
    fn user_error_passes_through() {
        let err = PoolError::User("out of pie".into());
        assert_eq!(err.to_string(), "out of pie");
    }
}
