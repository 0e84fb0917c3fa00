//! Bounded retry and polling primitives.
//!
//! Every loop here ends: retries stop after `max_attempts`, polls stop at the
//! caller's [`Deadline`]. Both sleep on the current thread; there is no
//! background scheduler.

use crate::error::{VpnError, VpnResult};
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry settings for calls that may fail transiently
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Immediate retries; keeps tests fast
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

/// Run `operation`, retrying only [`VpnError::TransientRemoteError`] failures.
///
/// Any other error is returned at once. After the last attempt the last
/// transient error is returned unchanged.
pub fn retry_transient<T, F>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> VpnResult<T>
where
    F: FnMut() -> VpnResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                // Jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = delay.mul_f64(jitter);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis() as u64,
                    "transient failure, retrying"
                );
                std::thread::sleep(jittered);
                delay = next_delay(delay, policy.backoff_multiplier, policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

fn next_delay(delay: Duration, multiplier: f64, max: Duration) -> Duration {
    Duration::from_secs_f64((delay.as_secs_f64() * multiplier).min(max.as_secs_f64()))
}

/// Point in time after which polling gives up
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

/// Interval growth between polls
#[derive(Clone, Debug)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
        }
    }
}

/// Outcome of one poll check
#[derive(Debug)]
pub enum Poll<T> {
    Ready(T),
    Pending(String),
}

/// Call `check` until it returns [`Poll::Ready`], an error, or the deadline passes.
///
/// Sleeps never overshoot the deadline: the last wait is cut to what remains,
/// and one final check runs before giving up.
pub fn poll_until<T, F>(
    deadline: &Deadline,
    policy: &PollPolicy,
    operation_name: &str,
    mut check: F,
) -> VpnResult<T>
where
    F: FnMut() -> VpnResult<Poll<T>>,
{
    let mut interval = policy.initial_interval;
    loop {
        match check()? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending(observed) => {
                if deadline.is_expired() {
                    return Err(VpnError::DeadlineExceeded {
                        operation: format!("{} (last observed: {})", operation_name, observed),
                        waited: deadline.limit(),
                    });
                }
                let wait = interval.min(deadline.remaining());
                debug!(
                    operation = %operation_name,
                    observed = %observed,
                    wait_ms = wait.as_millis() as u64,
                    "still pending"
                );
                std::thread::sleep(wait);
                interval = next_delay(interval, policy.multiplier, policy.max_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::Cell;

    fn transient() -> VpnError {
        VpnError::TransientRemoteError {
            operation: "describe".into(),
            message: "timed out".into(),
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry_transient(&RetryPolicy::immediate(3), "describe", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(transient())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: VpnResult<()> = retry_transient(&RetryPolicy::immediate(2), "describe", || {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::TransientRemoteError);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: VpnResult<()> = retry_transient(&RetryPolicy::immediate(5), "describe", || {
            calls.set(calls.get() + 1);
            Err(VpnError::NoEndpointFound("vpn-0001".into()))
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NoEndpointFound);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let calls = Cell::new(0);
        let _ = retry_transient(&RetryPolicy::immediate(0), "describe", || {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let next = next_delay(Duration::from_secs(6), 2.0, Duration::from_secs(8));
        assert_eq!(next, Duration::from_secs(8));
    }

    #[test]
    fn poll_returns_when_ready() {
        let checks = Cell::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = poll_until(&deadline, &PollPolicy::fixed(Duration::from_millis(1)), "stack", || {
            checks.set(checks.get() + 1);
            if checks.get() == 3 {
                Ok(Poll::Ready("CREATE_COMPLETE"))
            } else {
                Ok(Poll::Pending("CREATE_IN_PROGRESS".into()))
            }
        })
        .unwrap();
        assert_eq!(value, "CREATE_COMPLETE");
        assert_eq!(checks.get(), 3);
    }

    #[test]
    fn poll_stops_at_deadline() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result: VpnResult<()> =
            poll_until(&deadline, &PollPolicy::fixed(Duration::from_millis(5)), "stack", || {
                Ok(Poll::Pending("CREATE_IN_PROGRESS".into()))
            });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(err.to_string().contains("CREATE_IN_PROGRESS"));
    }

    #[test]
    fn poll_propagates_check_errors() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: VpnResult<()> = poll_until(&deadline, &PollPolicy::default(), "stack", || {
            Err(VpnError::toolchain("cloudformation", "ROLLBACK_COMPLETE"))
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Toolchain);
    }
}
