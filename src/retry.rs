//! Bounded exponential retry for calls to external services.
//!
//! Wraps `backoff::future::retry` with an attempt budget. Operations classify
//! their own failures with `backoff::Error::{transient, permanent}`; once the
//! budget is spent the last transient error is returned as `Exhausted`.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// Five attempts, waiting 2s, 4s, 8s, 16s in between.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Debug + fmt::Display> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Permanent(E),
}

impl<E: fmt::Debug + fmt::Display> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }
}

enum Failure<E> {
    Transient(E),
    Permanent(E),
}

/// Run `op` until it succeeds, fails permanently, or `policy.max_attempts` is reached.
pub async fn retry_bounded<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: fmt::Debug + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts.max(1);

    let result = retry(policy.backoff(), || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(backoff::Error::Permanent(e)) => {
                    Err(backoff::Error::permanent(Failure::Permanent(e)))
                }
                Err(backoff::Error::Transient { err, .. }) if attempt >= max_attempts => {
                    Err(backoff::Error::permanent(Failure::Transient(err)))
                }
                Err(backoff::Error::Transient { err, retry_after }) => {
                    tracing::debug!(attempt, error = %err, "transient failure, retrying");
                    Err(backoff::Error::Transient {
                        err: Failure::Transient(err),
                        retry_after,
                    })
                }
            }
        }
    })
    .await;

    match result {
        Ok(value) => Ok(value),
        Err(Failure::Permanent(e)) => Err(RetryError::Permanent(e)),
        Err(Failure::Transient(last)) => Err(RetryError::Exhausted {
            attempts: attempts.load(Ordering::SeqCst),
            last,
        }),
    }
}
