//! Bounded exponential backoff for RPC calls against a Source or Target.
//!
//! Spec §5/§7: "retries are local to RPCs with bounded exponential backoff;
//! exhaustion is reported up to the Checkpoint". This is the shared
//! implementation of that local retry loop.

use std::time::Duration;

use anyhow::Error;
use log::warn;

/// Retry policy: up to `max_attempts` calls, doubling the delay after each
/// failed attempt starting from `initial_delay`, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Runs `op`, retrying on `Err` up to `max_attempts` times. `is_transient`
    /// decides whether a given error is worth retrying at all; a
    /// non-transient error is returned immediately on first failure.
    pub fn run<T>(
        &self,
        label: &str,
        mut is_transient: impl FnMut(&Error) -> bool,
        mut op: impl FnMut() -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut delay = self.initial_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_transient(&err) => {
                    warn!(
                        "{label}: attempt {attempt}/{} failed: {err:#}, retrying in {delay:?}",
                        self.max_attempts
                    );
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, self.max_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Whether an I/O-flavored failure looks worth retrying: the kinds a local
/// filesystem or a flaky RPC transport can throw transiently, as opposed to
/// a permanent condition like "not found" or "permission denied".
pub fn is_transient_io(err: &Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .map(|e| {
            matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };

        let result = policy.run(
            "test",
            |_| true,
            || {
                let n = calls.get() + 1;
                calls.set(n);
                if n < 3 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            },
        );

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_transient_errors_fail_fast() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), Error> = policy.run(
            "test",
            |_| false,
            || {
                calls.set(calls.get() + 1);
                Err(anyhow::anyhow!("permanent"))
            },
        );

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn exhaustion_surfaces_last_error() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };

        let result: Result<(), Error> = policy.run("test", |_| true, || Err(anyhow::anyhow!("boom")));
        assert!(result.is_err());
    }

    #[test]
    fn is_transient_io_matches_interrupted_and_would_block() {
        let interrupted: Error = std::io::Error::from(std::io::ErrorKind::Interrupted).into();
        let not_found: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        let opaque = anyhow::anyhow!("not an io error");
        assert!(is_transient_io(&interrupted));
        assert!(!is_transient_io(&not_found));
        assert!(!is_transient_io(&opaque));
    }
}
