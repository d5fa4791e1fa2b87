//! Bounded retry for transient I/O.

use std::fmt;
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::logging::LogContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub attempts: u32,
    /// Wait before retry `n` is `n × backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, backoff: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts: attempts.max(1), backoff }
    }

    /// A policy that tries once.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempts are used up, returning the
    /// last error.
    pub fn run<T, F>(&self, log: &LogContext, what: impl fmt::Display, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts => {
                    log.warn(format_args!("{what}: attempt {attempt}/{attempts} failed: {e}"));
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChipmapError;

    #[test]
    fn retries_until_success() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let mut calls = 0;
        let out = policy.run(&LogContext::new("test"), "op", || {
            calls += 1;
            if calls < 3 {
                Err(ChipmapError::grid("transient"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_the_last_attempt() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let mut calls = 0;
        let out: Result<()> = policy.run(&LogContext::new("test"), "op", || {
            calls += 1;
            Err(ChipmapError::grid("down"))
        });
        assert!(out.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _ = RetryPolicy::new(0, Duration::ZERO).run(&LogContext::new("test"), "op", || {
            calls += 1;
            Ok::<_, ChipmapError>(())
        });
        assert_eq!(calls, 1);
    }
}
