//! Circuit breaker and retry budgets for unreliable backends
//!
//! Reads run every poll tick, so repeated auth, rate-limit, server or timeout
//! failures open the circuit and later reads fail fast until the backoff
//! window passes. The first read after the window is the half-open probe.
//! Writes get a small retry budget and never short-circuit.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::GmailError;

/// Thresholds, budgets and delays for a [`CircuitBreaker`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive classified failures that open the circuit
    pub failure_threshold: u32,
    /// Backoff when the circuit first opens
    pub initial_backoff: Duration,
    /// Ceiling for the exponential backoff
    pub max_backoff: Duration,
    /// Attempts per read call
    pub read_attempts: u32,
    /// Attempts per write call
    pub write_attempts: u32,
    /// Linear retry step; attempt `n` waits `n * retry_delay`
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(600),
            read_attempts: 3,
            write_attempts: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after `failures` consecutive classified failures
    ///
    /// Zero below the threshold, then `initial * 2^(failures - threshold)`
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        if failures < self.failure_threshold {
            return Duration::ZERO;
        }
        let exponent = failures - self.failure_threshold;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub backoff_until: Option<DateTime<Utc>>,
}

impl CircuitState {
    /// Whether a call made at `now` must fail fast
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }
}

/// Per-account circuit breaker
pub struct CircuitBreaker {
    name: String,
    policy: RetryPolicy,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    ///
    /// # Arguments
    /// * `name` - Used in log lines, usually the account email
    /// * `policy` - Thresholds and delays
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> CircuitState {
        self.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open_at(Utc::now())
    }

    /// Run a read through the breaker
    ///
    /// Not-found becomes `T::default()` and leaves the state alone. Classified
    /// failures count toward opening the circuit; once it opens the call
    /// stops retrying. Other retryable failures use the linear read budget.
    pub async fn read<T, F, Fut>(&self, mut op: F) -> Result<T, GmailError>
    where
        T: Default,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GmailError>>,
    {
        let attempts = self.policy.read_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if let Some(until) = self.open_until() {
                return Err(GmailError::CircuitOpen { until });
            }

            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) if e.is_not_found() => {
                    debug!("{}: not found, returning empty result", self.name);
                    return Ok(T::default());
                }
                Err(e) if e.trips_circuit() => {
                    if self.record_failure() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_delay * attempt).await;
            }
        }

        Err(last_error.unwrap_or_else(|| GmailError::Transient("read budget exhausted".into())))
    }

    /// Run a write with the write budget; the circuit is not consulted
    pub async fn write<T, F, Fut>(&self, mut op: F) -> Result<T, GmailError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GmailError>>,
    {
        let attempts = self.policy.write_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("{}: write attempt {}/{} failed: {}", self.name, attempt, attempts, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_delay * attempt).await;
            }
        }

        Err(last_error.unwrap_or_else(|| GmailError::Transient("write budget exhausted".into())))
    }

    fn open_until(&self) -> Option<DateTime<Utc>> {
        let state = self.lock();
        let now = Utc::now();
        if state.is_open_at(now) {
            state.backoff_until
        } else {
            None
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if state.consecutive_failures > 0 {
            debug!("{}: circuit closed after {} failures", self.name, state.consecutive_failures);
        }
        state.consecutive_failures = 0;
        state.backoff_until = None;
    }

    /// Returns true when this failure opened the circuit
    fn record_failure(&self) -> bool {
        let mut state = self.lock();
        let now = Utc::now();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(now);

        if state.consecutive_failures < self.policy.failure_threshold {
            return false;
        }

        let backoff = self.policy.backoff_for(state.consecutive_failures);
        let until = chrono::Duration::from_std(backoff)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        state.backoff_until = Some(until);
        warn!(
            "{}: circuit open after {} consecutive failures, backing off {}s",
            self.name,
            state.consecutive_failures,
            backoff.as_secs()
        );
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
