//! Bounded retry combinator
//!
//! Every retry in drydock is a fixed number of attempts with a fixed delay between
//! them. There is no backoff and no deadline.

use std::time::Duration;

/// Attempt count and inter-attempt delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Lock wait: 5 checks, 2 seconds apart
pub const LOCK_WAIT: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(2));

/// Changeset batch inside `Up`: 3 attempts, back to back
pub const UPDATE_BATCH: RetryPolicy = RetryPolicy::immediate(3);

/// Setup's schema migration: retried once
pub const SETUP_MIGRATE: RetryPolicy = RetryPolicy::immediate(2);

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Run `op` until it succeeds or attempts are exhausted
    ///
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_if(op, |_| true)
    }

    /// Like [`run`](Self::run), but only errors accepted by `should_retry` are retried
    pub fn run_if<T, E, F, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && should_retry(&err) => {
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
