//! Shared error taxonomy for every coordination primitive.
//!
//! Handle methods return `bool`/tagged results for expected negative outcomes
//! (acquire-failed, release-unowned) and only ever fail with a [`CoordError`]
//! for the genuinely exceptional kinds: [`CoordError::Unexpected`] and
//! [`CoordError::TypeMismatch`]. The `*OrFail` convenience methods raise the
//! matching domain variant for outcomes that would otherwise be a plain
//! `bool`.

use std::fmt;

/// The single error type crossing every primitive's public boundary.
///
/// Backend-specific errors (`sqlx::Error`, `redis::RedisError`, ...) are
/// converted into [`CoordError::Unexpected`] at the adapter boundary via
/// `anyhow::Error::from`; they never leak their concrete type through a
/// handle method.
#[derive(thiserror::Error, Debug)]
pub enum CoordError {
    /// A non-blocking acquire found the resource held by someone else.
    #[error("key already acquired by another owner")]
    AlreadyAcquired,

    /// A release/refresh was attempted by a non-owner.
    #[error("operation attempted by a non-owner")]
    UnownedOperation,

    /// Attempt to run through an `OPEN` circuit breaker.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The retry engine gave up after exhausting its budget.
    #[error("retry exhausted after {attempts} attempt(s)")]
    RetryExhausted {
        /// Number of invocations of the retried function.
        attempts: u32,
        /// The last error observed before giving up.
        #[source]
        source: anyhow::Error,
    },

    /// Operation was cancelled via an abort signal.
    #[error("operation aborted")]
    Aborted,

    /// e.g. `increment` on a non-numeric cache value.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// An event payload failed schema validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A propagated backend or programming error.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl CoordError {
    /// Builds a [`CoordError::TypeMismatch`] with a formatted message.
    pub fn type_mismatch(message: impl fmt::Display) -> Self {
        Self::TypeMismatch(message.to_string())
    }

    /// Builds a [`CoordError::Validation`] with a formatted message.
    pub fn validation(message: impl fmt::Display) -> Self {
        Self::Validation(message.to_string())
    }

    /// Whether this error kind represents an "expected negative outcome"
    /// rather than an exceptional one (useful for middleware that wants to
    /// avoid logging acquire-failed at `error` level).
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::AlreadyAcquired | Self::UnownedOperation | Self::CircuitOpen | Self::Aborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_wraps_anyhow_error() {
        let source = anyhow::anyhow!("boom");
        let err: CoordError = source.into();
        assert!(matches!(err, CoordError::Unexpected(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn expected_outcomes_are_flagged() {
        assert!(CoordError::AlreadyAcquired.is_expected());
        assert!(CoordError::UnownedOperation.is_expected());
        assert!(CoordError::CircuitOpen.is_expected());
        assert!(CoordError::Aborted.is_expected());
        assert!(!CoordError::type_mismatch("not numeric").is_expected());
        assert!(!CoordError::validation("bad payload").is_expected());
    }

    #[test]
    fn retry_exhausted_reports_attempt_count() {
        let err = CoordError::RetryExhausted {
            attempts: 4,
            source: anyhow::anyhow!("last failure"),
        };
        assert_eq!(err.to_string(), "retry exhausted after 4 attempt(s)");
    }
}
