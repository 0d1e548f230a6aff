//! Backoff delay policies used by the retry engine and by blocking
//! acquire/admission loops.
//!
//! A [`BackoffPolicy`] is a pure function of `(attempt, error)` returning a
//! delay. The four shapes in the spec (constant/linear/exponential/
//! polynomial) are provided as constructors; a caller may also supply an
//! arbitrary closure for the "dynamic: `(error) -> settings`" per-error
//! tuning case, since `BackoffPolicy` is itself just a boxed `Fn`.

use std::time::Duration;

use rand::Rng;

/// `jitter` multiplies the base delay by `1 ± jitter * rand()`. Must be in
/// `[0, 1]`; `None` disables jitter entirely.
pub type Jitter = Option<f64>;

fn apply_jitter(base: Duration, jitter: Jitter) -> Duration {
    let Some(jitter) = jitter else {
        return base;
    };
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

/// A pluggable delay function: given the 1-based attempt number and the
/// error that triggered the retry, returns how long to sleep before the next
/// attempt.
pub struct BackoffPolicy {
    compute: Box<dyn Fn(u32, &anyhow::Error) -> Duration + Send + Sync>,
}

impl BackoffPolicy {
    /// Wraps an arbitrary delay function, including dynamic "per-error
    /// tuning" policies.
    pub fn from_fn(
        compute: impl Fn(u32, &anyhow::Error) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            compute: Box::new(compute),
        }
    }

    /// A fixed delay on every attempt.
    #[must_use]
    pub fn constant(delay: Duration, jitter: Jitter) -> Self {
        Self::from_fn(move |_attempt, _err| apply_jitter(delay, jitter))
    }

    /// Delay grows linearly with the attempt number, clamped to `max_delay`.
    #[must_use]
    pub fn linear(min_delay: Duration, max_delay: Duration, jitter: Jitter) -> Self {
        Self::from_fn(move |attempt, _err| {
            let scaled = min_delay.saturating_mul(attempt.max(1));
            apply_jitter(scaled.min(max_delay), jitter)
        })
    }

    /// Delay grows by `multiplier` each attempt, clamped to `max_delay`.
    #[must_use]
    pub fn exponential(
        min_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: Jitter,
    ) -> Self {
        Self::from_fn(move |attempt, _err| {
            let exp = multiplier.powi(i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX));
            let scaled = Duration::from_secs_f64((min_delay.as_secs_f64() * exp).max(0.0));
            apply_jitter(scaled.min(max_delay), jitter)
        })
    }

    /// Delay grows as `attempt ^ degree`, clamped to `max_delay`.
    #[must_use]
    pub fn polynomial(
        min_delay: Duration,
        max_delay: Duration,
        degree: f64,
        jitter: Jitter,
    ) -> Self {
        Self::from_fn(move |attempt, _err| {
            let factor = f64::from(attempt.max(1)).powf(degree);
            let scaled = Duration::from_secs_f64((min_delay.as_secs_f64() * factor).max(0.0));
            apply_jitter(scaled.min(max_delay), jitter)
        })
    }

    /// Computes the delay for `attempt` given the error that triggered it.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &anyhow::Error) -> Duration {
        (self.compute)(attempt, error)
    }
}

// The boxed closure has no useful field state and isn't `Debug` itself, so
// implement it by hand rather than deriving.
impl std::fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err() -> anyhow::Error {
        anyhow::anyhow!("retryable")
    }

    #[test]
    fn constant_ignores_attempt_number() {
        let policy = BackoffPolicy::constant(Duration::from_millis(100), None);
        assert_eq!(policy.delay_for(1, &err()), Duration::from_millis(100));
        assert_eq!(policy.delay_for(9, &err()), Duration::from_millis(100));
    }

    #[test]
    fn linear_grows_and_clamps() {
        let policy = BackoffPolicy::linear(
            Duration::from_millis(10),
            Duration::from_millis(25),
            None,
        );
        assert_eq!(policy.delay_for(1, &err()), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2, &err()), Duration::from_millis(20));
        assert_eq!(policy.delay_for(10, &err()), Duration::from_millis(25));
    }

    #[test]
    fn exponential_grows_and_clamps() {
        let policy = BackoffPolicy::exponential(
            Duration::from_millis(10),
            Duration::from_millis(1000),
            2.0,
            None,
        );
        assert_eq!(policy.delay_for(1, &err()), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2, &err()), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3, &err()), Duration::from_millis(40));
    }

    #[test]
    fn polynomial_grows_and_clamps() {
        let policy = BackoffPolicy::polynomial(
            Duration::from_millis(10),
            Duration::from_millis(1000),
            2.0,
            None,
        );
        assert_eq!(policy.delay_for(1, &err()), Duration::from_millis(10));
        assert_eq!(policy.delay_for(3, &err()), Duration::from_millis(90));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::constant(Duration::from_millis(100), Some(0.5));
        for attempt in 1..50 {
            let delay = policy.delay_for(attempt, &err());
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn none_jitter_disables_randomization() {
        let policy = BackoffPolicy::constant(Duration::from_millis(100), None);
        for attempt in 1..10 {
            assert_eq!(policy.delay_for(attempt, &err()), Duration::from_millis(100));
        }
    }
}
