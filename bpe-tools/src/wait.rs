//! A tiny generation-counter condition variable, used to implement blocking
//! waits such as `files_db.wait_new_file()` and `Checkpoint::wait_status()`
//! without pulling in an async runtime for the engine core.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Wakes waiters whenever `bump()` is called, regardless of whether they
/// were already waiting or arrive afterwards (each waiter remembers the
/// generation it last observed).
#[derive(Debug, Default)]
pub struct Notifier {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        *self.generation.lock().unwrap()
    }

    /// Wakes every current waiter and advances the generation counter.
    pub fn bump(&self) {
        let mut gen = self.generation.lock().unwrap();
        *gen += 1;
        self.condvar.notify_all();
    }

    /// Blocks until the generation advances past `since`, `timeout`
    /// elapses, or `done` becomes true. Returns the generation observed on
    /// return.
    pub fn wait_for_change(
        &self,
        since: u64,
        timeout: Duration,
        mut done: impl FnMut() -> bool,
    ) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut gen = self.generation.lock().unwrap();

        while *gen == since && !done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (guard, result) = self.condvar.wait_timeout(gen, remaining).unwrap();
            gen = guard;
            if result.timed_out() {
                break;
            }
        }

        *gen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn bump_wakes_waiter() {
        let notifier = Arc::new(Notifier::new());
        let waiter = Arc::clone(&notifier);

        let handle = thread::spawn(move || {
            waiter.wait_for_change(0, Duration::from_secs(5), || false)
        });

        thread::sleep(Duration::from_millis(20));
        notifier.bump();

        let observed = handle.join().unwrap();
        assert_eq!(observed, 1);
    }

    #[test]
    fn wait_times_out_without_bump() {
        let notifier = Notifier::new();
        let started = Instant::now();
        let observed = notifier.wait_for_change(0, Duration::from_millis(20), || false);
        assert_eq!(observed, 0);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
