use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::BreakerConfig;

/// Operational mode of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls pass through.
    Closed,
    /// Failing fast - calls are short-circuited until the open timeout elapses.
    Open,
    /// A single probe call decides whether to close or re-open.
    HalfOpen,
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker is closed; execute normally.
    Allowed,
    /// Breaker is half-open and this call is the single probe.
    Probe,
    /// Breaker is open (or a probe is already in flight); do not execute.
    Rejected { retry_in: Duration },
}

/// A state change, reported so the caller can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Per-dependency failure tracker.
///
/// `consecutive_failures` is reset only by a successful call (or worn down by
/// [`decay`](Self::decay) while closed). `success_count` and `failure_count`
/// are lifetime counters used for rate reporting.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    success_count: u64,
    failure_count: u64,
    probe_in_flight: bool,
}

/// Read-only view of a breaker for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub threshold: u32,
}

impl CircuitBreakerState {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_failure_wall: None,
            success_count: 0,
            failure_count: 0,
            probe_in_flight: false,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Decides whether a call may run at `now`.
    ///
    /// An open breaker whose timeout has elapsed moves to half-open and admits
    /// exactly one probe; further calls are rejected until that probe settles.
    pub fn admit(&mut self, now: Instant) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.config.open_timeout);

                if elapsed < self.config.open_timeout {
                    return (
                        Admission::Rejected {
                            retry_in: self.config.open_timeout - elapsed,
                        },
                        None,
                    );
                }

                self.state = CircuitState::HalfOpen;
                self.probe_in_flight = true;
                (
                    Admission::Probe,
                    Some(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    }),
                )
            }
            CircuitState::HalfOpen if self.probe_in_flight => (
                Admission::Rejected {
                    retry_in: Duration::ZERO,
                },
                None,
            ),
            CircuitState::HalfOpen => {
                self.probe_in_flight = true;
                (Admission::Probe, None)
            }
        }
    }

    /// Records a successful protected call.
    pub fn record_success(&mut self) -> Option<Transition> {
        self.success_count += 1;
        self.consecutive_failures = 0;

        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
            self.probe_in_flight = false;
            return Some(Transition {
                from: CircuitState::HalfOpen,
                to: CircuitState::Closed,
            });
        }
        None
    }

    /// Records a failed (or timed-out) protected call.
    pub fn record_failure(&mut self, now: Instant, wall: DateTime<Utc>) -> Option<Transition> {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.last_failure_wall = Some(wall);

        match self.state {
            CircuitState::Closed if self.consecutive_failures >= self.config.threshold => {
                self.state = CircuitState::Open;
                Some(Transition {
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.probe_in_flight = false;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            // A call admitted before the trip finished late; the timestamp
            // refresh above already extends the open window.
            CircuitState::Open => None,
        }
    }

    /// Frees the half-open slot when a probe was abandoned without an outcome.
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    /// Wears `consecutive_failures` down by one while closed.
    ///
    /// Returns true when the counter changed.
    pub fn decay(&mut self) -> bool {
        if self.state == CircuitState::Closed && self.consecutive_failures > 0 {
            self.consecutive_failures -= 1;
            return true;
        }
        false
    }

    /// Share of successful calls over the breaker's lifetime. 1.0 before any call.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 1.0;
        }
        self.success_count as f64 / total as f64
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_wall,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
            threshold: self.config.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_secs: u64) -> CircuitBreakerState {
        CircuitBreakerState::new(BreakerConfig::new(
            threshold,
            Duration::from_secs(open_secs),
            Duration::from_secs(1),
        ))
    }

    fn fail(b: &mut CircuitBreakerState, now: Instant) -> Option<Transition> {
        b.record_failure(now, Utc::now())
    }

    #[test]
    fn test_trips_exactly_at_threshold() {
        let now = Instant::now();
        let mut b = breaker(3, 30);

        fail(&mut b, now);
        fail(&mut b, now);
        assert_eq!(b.state(), CircuitState::Closed);

        let transition = fail(&mut b, now);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let now = Instant::now();
        let mut b = breaker(3, 30);

        fail(&mut b, now);
        fail(&mut b, now);
        b.record_success();
        fail(&mut b, now);

        assert_eq!(b.consecutive_failures(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let start = Instant::now();
        let mut b = breaker(1, 30);
        fail(&mut b, start);

        let (admission, _) = b.admit(start + Duration::from_secs(10));
        assert_eq!(
            admission,
            Admission::Rejected {
                retry_in: Duration::from_secs(20)
            }
        );
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let start = Instant::now();
        let mut b = breaker(1, 30);
        fail(&mut b, start);

        let later = start + Duration::from_secs(31);
        let (first, transition) = b.admit(later);
        assert_eq!(first, Admission::Probe);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(transition.is_some());

        let (second, _) = b.admit(later);
        assert!(matches!(second, Admission::Rejected { .. }));
    }

    #[test]
    fn test_probe_success_closes() {
        let start = Instant::now();
        let mut b = breaker(2, 30);
        fail(&mut b, start);
        fail(&mut b, start);

        b.admit(start + Duration::from_secs(30));
        b.record_success();

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.admit(start + Duration::from_secs(30)).0, Admission::Allowed);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_timestamp() {
        let start = Instant::now();
        let mut b = breaker(1, 30);
        fail(&mut b, start);

        let probe_at = start + Duration::from_secs(31);
        b.admit(probe_at);
        fail(&mut b, probe_at);
        assert_eq!(b.state(), CircuitState::Open);

        let (admission, _) = b.admit(probe_at + Duration::from_secs(5));
        assert_eq!(
            admission,
            Admission::Rejected {
                retry_in: Duration::from_secs(25)
            }
        );
    }

    #[test]
    fn test_released_probe_can_be_retried() {
        let start = Instant::now();
        let mut b = breaker(1, 10);
        fail(&mut b, start);

        let later = start + Duration::from_secs(11);
        b.admit(later);
        b.release_probe();
        assert_eq!(b.admit(later).0, Admission::Probe);
    }

    #[test]
    fn test_decay_only_while_closed() {
        let now = Instant::now();
        let mut b = breaker(3, 30);
        fail(&mut b, now);
        fail(&mut b, now);

        assert!(b.decay());
        assert_eq!(b.consecutive_failures(), 1);
        assert!(b.decay());
        assert!(!b.decay());

        let mut open = breaker(1, 30);
        fail(&mut open, now);
        assert!(!open.decay());
        assert_eq!(open.consecutive_failures(), 1);
    }

    #[test]
    fn test_success_rate() {
        let now = Instant::now();
        let mut b = breaker(10, 30);
        assert_eq!(b.success_rate(), 1.0);

        b.record_success();
        b.record_success();
        b.record_success();
        fail(&mut b, now);

        assert_eq!(b.success_rate(), 0.75);
        let status = b.status();
        assert_eq!(status.success_count, 3);
        assert_eq!(status.failure_count, 1);
        assert!(status.last_failure_at.is_some());
    }
}
