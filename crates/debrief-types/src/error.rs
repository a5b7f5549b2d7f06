//! Construction errors for the shared types.

use thiserror::Error;

/// Rejected constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// Span bounds out of order.
    #[error("invalid log span: start {start} is after end {end}")]
    InvalidSpan { start: usize, end: usize },

    /// Session end precedes its start.
    #[error("invalid session times: end {end} is before start {start}")]
    InvalidTimes { start: i64, end: i64 },

    /// A session descriptor that was not switched into past-session mode.
    #[error("session '{0}' is not in past-session mode")]
    NotPastSession(String),

    /// Any other argument problem.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
