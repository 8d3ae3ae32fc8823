//! Bounded polling for carrier calls.
//!
//! Carrier adapters never retry a failed call on their own. The one place
//! where waiting is part of the protocol is label retrieval for carriers that
//! render labels asynchronously: the adapter asks a label endpoint at a
//! fixed interval until the label shows up or an attempt ceiling is reached.
//! That behavior is captured by [`PollPolicy`] and [`poll_until`].
//!
//! # Example
//!
//! ```
//! use consign_retry::{PollOutcome, PollPolicy, poll_until};
//! use std::time::Duration;
//!
//! let policy = PollPolicy::new(Duration::ZERO, 5);
//! let outcome: Result<_, ()> = poll_until(&policy, |_| true, |attempt| {
//!     Ok((attempt == 3).then_some("label"))
//! });
//!
//! assert_eq!(
//!     outcome,
//!     Ok(PollOutcome::Ready { value: "label", attempts: 3 })
//! );
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error classification used to tell callers whether re-running a whole
/// shipment attempt is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Nothing reached the carrier, or the failure is transient
    #[default]
    Retryable,
    /// The carrier may already hold a shipment for this attempt
    Ambiguous,
    /// Re-running the same attempt will fail the same way
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Ambiguous => write!(f, "ambiguous"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Default interval between label checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default number of label checks before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

fn default_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_max_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}

/// Fixed-interval, fixed-ceiling polling policy.
///
/// Worst-case added latency is `interval * (max_attempts - 1)` plus the time
/// spent in the checks themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Wait between two consecutive checks.
    #[serde(default = "default_interval")]
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Total number of checks, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    /// Create a policy. A ceiling of zero is raised to one check.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Upper bound of time spent sleeping between checks.
    pub fn max_wait(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.max(1).saturating_sub(1))
    }
}

/// How a polling loop ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check reported success on attempt `attempts`.
    Ready { value: T, attempts: u32 },
    /// Every check ran and none reported success.
    Exhausted { attempts: u32 },
    /// The sleeper refused to wait any longer (cancellation or deadline).
    Interrupted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    /// Number of checks that actually ran.
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. }
            | PollOutcome::Exhausted { attempts }
            | PollOutcome::Interrupted { attempts } => *attempts,
        }
    }
}

/// Run `check` until it yields a value or the policy is exhausted.
///
/// `check` receives the 1-indexed attempt number and returns `Ok(Some(_))`
/// on success, `Ok(None)` when the resource is not ready yet, and `Err(_)`
/// to abort polling immediately. `sleep` performs the wait between checks and
/// returns `false` when the loop must stop.
pub fn poll_until<T, E, S, F>(
    policy: &PollPolicy,
    mut sleep: S,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    S: FnMut(Duration) -> bool,
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if let Some(value) = check(attempt)? {
            return Ok(PollOutcome::Ready {
                value,
                attempts: attempt,
            });
        }

        if attempt >= max_attempts {
            return Ok(PollOutcome::Exhausted { attempts: attempt });
        }

        if !sleep(policy.interval) {
            return Ok(PollOutcome::Interrupted { attempts: attempt });
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_poll_policy_defaults() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(200));
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.max_wait(), Duration::from_millis(1800));
    }

    #[test]
    fn test_poll_policy_zero_attempts_still_checks_once() {
        let policy = PollPolicy::new(Duration::ZERO, 0);
        let checks = RefCell::new(0);
        let outcome: Result<PollOutcome<()>, ()> = poll_until(&policy, |_| true, |_| {
            *checks.borrow_mut() += 1;
            Ok(None)
        });
        assert_eq!(outcome, Ok(PollOutcome::Exhausted { attempts: 1 }));
        assert_eq!(*checks.borrow(), 1);
    }

    #[test]
    fn test_deserialized_zero_attempts_still_checks_once() {
        let policy: PollPolicy = serde_json::from_str(r#"{"max_attempts": 0}"#).unwrap();
        let outcome: Result<PollOutcome<()>, ()> = poll_until(&policy, |_| true, |_| Ok(None));
        assert_eq!(outcome, Ok(PollOutcome::Exhausted { attempts: 1 }));
    }

    #[test]
    fn test_poll_until_succeeds_on_last_attempt() {
        let policy = PollPolicy::new(Duration::from_millis(200), 10);
        let mut sleeps = Vec::new();
        let outcome: Result<_, ()> = poll_until(
            &policy,
            |d| {
                sleeps.push(d);
                true
            },
            |attempt| Ok((attempt == 10).then_some(attempt)),
        );

        assert_eq!(
            outcome,
            Ok(PollOutcome::Ready {
                value: 10,
                attempts: 10
            })
        );
        assert_eq!(sleeps.len(), 9);
        assert!(sleeps.iter().all(|d| *d == Duration::from_millis(200)));
    }

    #[test]
    fn test_poll_until_exhausts() {
        let policy = PollPolicy::new(Duration::ZERO, 10);
        let mut checks = 0;
        let outcome: Result<PollOutcome<()>, ()> = poll_until(&policy, |_| true, |_| {
            checks += 1;
            Ok(None)
        });

        assert_eq!(outcome, Ok(PollOutcome::Exhausted { attempts: 10 }));
        assert_eq!(checks, 10);
    }

    #[test]
    fn test_poll_until_stops_on_check_error() {
        let policy = PollPolicy::new(Duration::ZERO, 10);
        let outcome: Result<PollOutcome<()>, &str> = poll_until(&policy, |_| true, |attempt| {
            if attempt == 2 { Err("unauthorized") } else { Ok(None) }
        });

        assert_eq!(outcome, Err("unauthorized"));
    }

    #[test]
    fn test_poll_until_interrupted_by_sleeper() {
        let policy = PollPolicy::new(Duration::from_millis(200), 10);
        let outcome: Result<PollOutcome<()>, ()> = poll_until(&policy, |_| false, |_| Ok(None));
        assert_eq!(outcome, Ok(PollOutcome::Interrupted { attempts: 1 }));
    }

    #[test]
    fn test_poll_policy_serde_humantime() {
        let json = r#"{"interval": "250ms", "max_attempts": 4}"#;
        let policy: PollPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 4);

        let defaults: PollPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, PollPolicy::default());
    }

    #[test]
    fn test_error_class_display() {
        assert_eq!(ErrorClass::Retryable.to_string(), "retryable");
        assert_eq!(ErrorClass::Ambiguous.to_string(), "ambiguous");
        assert_eq!(ErrorClass::Permanent.to_string(), "permanent");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn poll_runs_exactly_until_ready(ready_at in 1u32..30, max in 1u32..30) {
                let policy = PollPolicy::new(Duration::ZERO, max);
                let mut checks = 0u32;
                let outcome: Result<_, ()> = poll_until(&policy, |_| true, |attempt| {
                    checks += 1;
                    Ok((attempt == ready_at).then_some(()))
                });

                if ready_at <= max {
                    prop_assert_eq!(outcome, Ok(PollOutcome::Ready { value: (), attempts: ready_at }));
                    prop_assert_eq!(checks, ready_at);
                } else {
                    prop_assert_eq!(outcome, Ok(PollOutcome::Exhausted { attempts: max }));
                    prop_assert_eq!(checks, max);
                }
            }

            #[test]
            fn sleeps_are_constant_and_bounded(interval_ms in 0u64..10_000, max in 1u32..50) {
                let policy = PollPolicy::new(Duration::from_millis(interval_ms), max);
                let mut sleeps = Vec::new();
                let _: Result<PollOutcome<()>, ()> = poll_until(
                    &policy,
                    |d| {
                        sleeps.push(d);
                        true
                    },
                    |_| Ok(None),
                );
                prop_assert!(sleeps.iter().all(|d| *d == policy.interval));
                prop_assert_eq!(sleeps.iter().sum::<Duration>(), policy.max_wait());
            }
        }
    }
}
