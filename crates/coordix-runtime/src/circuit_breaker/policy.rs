//! Pluggable breaker policies: pure functions over `(metrics, now)` that
//! decide tracking updates and CLOSED/HALF_OPEN transition recommendations.
//! [`super::decide_transition`] owns the actual state machine; a policy only
//! ever answers "should this state let go".

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::PolicyDecision;

/// A single tracked call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

/// One sample in a breaker's rolling history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sample {
    pub at: u64,
    pub outcome: Outcome,
}

/// The policy-owned metrics a breaker record carries between calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub samples: VecDeque<Sample>,
}

impl BreakerMetrics {
    fn push(&mut self, outcome: Outcome, at: u64) {
        self.samples.push_back(Sample { at, outcome });
    }

    fn failure_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|s| s.outcome == Outcome::Failure).count();
        #[allow(clippy::cast_precision_loss)]
        {
            failures as f64 / self.samples.len() as f64
        }
    }
}

/// A breaker's tracking and transition policy. Every method is a pure
/// function of its inputs — implementations must not hold interior mutable
/// state, since the same policy instance is shared by every key a provider
/// serves.
pub trait BreakerPolicy: Send + Sync {
    /// The metrics a brand-new breaker record starts with.
    fn initial_metrics(&self) -> BreakerMetrics;

    /// Returns `metrics` with a success sample appended (and truncated to
    /// this policy's retention rule).
    fn track_success(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics;

    /// Returns `metrics` with a failure sample appended (and truncated).
    fn track_failure(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics;

    /// Evaluated while CLOSED: whether the failure rate now warrants OPEN.
    fn when_closed(&self, metrics: &BreakerMetrics, now: u64) -> PolicyDecision;

    /// Evaluated while HALF_OPEN: whether the trial calls recovered or
    /// reconfirmed the fault.
    fn when_half_opened(&self, metrics: &BreakerMetrics, now: u64) -> PolicyDecision;
}

/// Trips open once at least `minimum_calls` of the last `window` calls have
/// been recorded and the failure ratio reaches `threshold`.
pub struct CountBasedPolicy {
    window: usize,
    threshold: f64,
    minimum_calls: usize,
}

impl CountBasedPolicy {
    /// `window` caps how many trailing samples are retained; `threshold` is
    /// the failure ratio (0.0-1.0) that trips OPEN; `minimum_calls` is the
    /// smallest sample count the policy will act on.
    #[must_use]
    pub fn new(window: usize, threshold: f64, minimum_calls: usize) -> Self {
        Self {
            window,
            threshold,
            minimum_calls,
        }
    }

    fn truncate(&self, mut metrics: BreakerMetrics) -> BreakerMetrics {
        while metrics.samples.len() > self.window {
            metrics.samples.pop_front();
        }
        metrics
    }
}

impl BreakerPolicy for CountBasedPolicy {
    fn initial_metrics(&self) -> BreakerMetrics {
        BreakerMetrics::default()
    }

    fn track_success(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics {
        let mut metrics = metrics.clone();
        metrics.push(Outcome::Success, now);
        self.truncate(metrics)
    }

    fn track_failure(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics {
        let mut metrics = metrics.clone();
        metrics.push(Outcome::Failure, now);
        self.truncate(metrics)
    }

    fn when_closed(&self, metrics: &BreakerMetrics, _now: u64) -> PolicyDecision {
        if metrics.samples.len() > self.minimum_calls && metrics.failure_ratio() >= self.threshold {
            PolicyDecision::ToOpen
        } else {
            PolicyDecision::None
        }
    }

    fn when_half_opened(&self, metrics: &BreakerMetrics, now: u64) -> PolicyDecision {
        if metrics.samples.len() <= self.minimum_calls {
            return PolicyDecision::None;
        }
        if metrics.failure_ratio() >= self.threshold {
            PolicyDecision::ToOpen
        } else {
            PolicyDecision::ToClosed
        }
    }
}

/// Like [`CountBasedPolicy`] but the retention window is a sliding time
/// span instead of a sample count: samples older than `window` are dropped
/// before the ratio is computed.
pub struct TimeBasedPolicy {
    window: Duration,
    threshold: f64,
    minimum_calls: usize,
}

impl TimeBasedPolicy {
    /// `window` is the trailing duration of samples considered; `threshold`
    /// and `minimum_calls` mirror [`CountBasedPolicy`].
    #[must_use]
    pub fn new(window: Duration, threshold: f64, minimum_calls: usize) -> Self {
        Self {
            window,
            threshold,
            minimum_calls,
        }
    }

    fn windowed(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics {
        let cutoff = now.saturating_sub(u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX));
        BreakerMetrics {
            samples: metrics.samples.iter().copied().filter(|s| s.at >= cutoff).collect(),
        }
    }
}

impl BreakerPolicy for TimeBasedPolicy {
    fn initial_metrics(&self) -> BreakerMetrics {
        BreakerMetrics::default()
    }

    fn track_success(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics {
        let mut metrics = self.windowed(metrics, now);
        metrics.push(Outcome::Success, now);
        metrics
    }

    fn track_failure(&self, metrics: &BreakerMetrics, now: u64) -> BreakerMetrics {
        let mut metrics = self.windowed(metrics, now);
        metrics.push(Outcome::Failure, now);
        metrics
    }

    fn when_closed(&self, metrics: &BreakerMetrics, now: u64) -> PolicyDecision {
        let windowed = self.windowed(metrics, now);
        if windowed.samples.len() > self.minimum_calls && windowed.failure_ratio() >= self.threshold {
            PolicyDecision::ToOpen
        } else {
            PolicyDecision::None
        }
    }

    fn when_half_opened(&self, metrics: &BreakerMetrics, now: u64) -> PolicyDecision {
        let windowed = self.windowed(metrics, now);
        if windowed.samples.len() <= self.minimum_calls {
            return PolicyDecision::None;
        }
        if windowed.failure_ratio() >= self.threshold {
            PolicyDecision::ToOpen
        } else {
            PolicyDecision::ToClosed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_based_trips_past_threshold() {
        let policy = CountBasedPolicy::new(4, 0.5, 2);
        let mut metrics = policy.initial_metrics();
        metrics = policy.track_failure(&metrics, 0);
        assert_eq!(policy.when_closed(&metrics, 0), PolicyDecision::None);
        // Exactly `minimum_calls` samples: stays CLOSED, the guard is strict.
        metrics = policy.track_failure(&metrics, 1);
        assert_eq!(policy.when_closed(&metrics, 1), PolicyDecision::None);
        metrics = policy.track_failure(&metrics, 2);
        assert_eq!(policy.when_closed(&metrics, 2), PolicyDecision::ToOpen);
    }

    #[test]
    fn count_based_window_truncates_oldest() {
        let policy = CountBasedPolicy::new(2, 0.5, 1);
        let mut metrics = policy.initial_metrics();
        metrics = policy.track_success(&metrics, 0);
        metrics = policy.track_failure(&metrics, 1);
        metrics = policy.track_failure(&metrics, 2);
        assert_eq!(metrics.samples.len(), 2);
        assert_eq!(policy.when_closed(&metrics, 2), PolicyDecision::ToOpen);
    }

    #[test]
    fn time_based_drops_samples_outside_window() {
        let policy = TimeBasedPolicy::new(Duration::from_millis(100), 0.5, 1);
        let mut metrics = policy.initial_metrics();
        metrics = policy.track_failure(&metrics, 0);
        assert_eq!(policy.when_closed(&metrics, 500), PolicyDecision::None);
    }
}
