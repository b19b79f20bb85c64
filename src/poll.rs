//! Polling with a deadline.
//!
//! Link readiness on this board is observed, not signaled: the FSMs and the
//! frame manager repeatedly sample status registers until a condition holds
//! or a deadline passes.  A timeout here is an expected outcome, so it is a
//! result kind rather than a panic or a special error.

use std::time::{Duration, Instant};

/// The condition did not become true before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout;

/// Evaluate `condition` every `interval` until it returns true or `timeout`
/// elapses.  The condition is always evaluated at least once.
pub fn wait_until<F>(mut condition: F, interval: Duration, timeout: Duration) -> Result<(), PollTimeout>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout);
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_success_does_not_sleep() {
        let start = Instant::now();
        let result = wait_until(|| true, Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(result, Ok(()));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn eventually_true() {
        let mut calls = 0;
        let result = wait_until(
            || {
                calls += 1;
                calls >= 3
            },
            Duration::from_millis(1),
            Duration::from_secs(1),
        );
        assert_eq!(result, Ok(()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn times_out() {
        let result = wait_until(|| false, Duration::from_millis(1), Duration::from_millis(5));
        assert_eq!(result, Err(PollTimeout));
    }
}
