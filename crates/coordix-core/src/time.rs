//! Time-to-live values shared by every coordination primitive.
//!
//! A [`TimeSpan`] is either a finite duration or "unexpiring" (`None`). It
//! carries millisecond precision throughout, matching the `BIGINT` unix-millis
//! fields used by the SQL backend schemas and the `PEXPIREAT` semantics of the
//! Redis backends.

use std::time::Duration;

/// A time-to-live: `Some(duration)` expires after `duration`, `None` never expires.
///
/// `TimeSpan` is a thin newtype so that "no TTL" and "TTL of zero" remain
/// distinguishable at every call site, mirroring the spec's `ttl?` optional
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSpan(Option<Duration>);

impl TimeSpan {
    /// An unexpiring span.
    #[must_use]
    pub const fn unexpiring() -> Self {
        Self(None)
    }

    /// A finite span.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(Some(duration))
    }

    /// Builds a span from a millisecond count.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Some(Duration::from_millis(millis)))
    }

    /// Whether this span never expires.
    #[must_use]
    pub const fn is_unexpiring(&self) -> bool {
        self.0.is_none()
    }

    /// The underlying duration, if finite.
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        self.0
    }

    /// The span in whole milliseconds, if finite.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_millis(&self) -> Option<u64> {
        self.0.map(|d| d.as_millis() as u64)
    }

    /// Computes the absolute expiration timestamp (unix millis) given `now`.
    ///
    /// Returns `None` for an unexpiring span.
    #[must_use]
    pub fn expiration_from(&self, now_millis: u64) -> Option<u64> {
        self.as_millis().map(|ms| now_millis.saturating_add(ms))
    }
}

impl From<Duration> for TimeSpan {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

impl From<Option<Duration>> for TimeSpan {
    fn from(duration: Option<Duration>) -> Self {
        Self(duration)
    }
}

/// Returns `true` if `expiration` (unix millis, `None` = unexpiring) has
/// elapsed relative to `now_millis`.
///
/// This is the single definition of "expired" used across lock, semaphore,
/// cache and circuit-breaker records: `expiration <= now` means logically
/// absent.
#[must_use]
pub fn is_expired(expiration: Option<u64>, now_millis: u64) -> bool {
    matches!(expiration, Some(exp) if exp <= now_millis)
}

/// Current unix-millis timestamp, the single clock source used throughout
/// this crate's adapters so tests can substitute a fixed clock.
#[must_use]
pub fn now_millis() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpiring_has_no_duration() {
        let span = TimeSpan::unexpiring();
        assert!(span.is_unexpiring());
        assert_eq!(span.duration(), None);
        assert_eq!(span.expiration_from(1_000), None);
    }

    #[test]
    fn finite_span_computes_expiration() {
        let span = TimeSpan::from_millis(50);
        assert!(!span.is_unexpiring());
        assert_eq!(span.expiration_from(1_000), Some(1_050));
    }

    #[test]
    fn is_expired_boundary_is_inclusive() {
        assert!(is_expired(Some(100), 100));
        assert!(is_expired(Some(100), 101));
        assert!(!is_expired(Some(100), 99));
        assert!(!is_expired(None, 1_000_000));
    }

    #[test]
    fn expiration_saturates_instead_of_overflowing() {
        let span = TimeSpan::from_millis(u64::MAX);
        assert_eq!(span.expiration_from(10), Some(u64::MAX));
    }
}
