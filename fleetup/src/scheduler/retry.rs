//! Bounded retry for the update check.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fleetup::scheduler::RetryPolicy;
//!
//! let policy = RetryPolicy::fixed(5, Duration::from_secs(5));
//! assert_eq!(policy.max_attempts(), 5);
//! assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(5)));
//! assert_eq!(policy.delay_for_attempt(5), None);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default number of update check attempts.
pub const DEFAULT_CHECK_ATTEMPTS: u32 = 5;

/// Default delay between update check attempts (5 seconds).
pub const DEFAULT_CHECK_DELAY_SECS: u64 = 5;

/// Default initial delay for exponential backoff (1 second).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default maximum delay for exponential backoff (5 minutes).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 300;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Granularity of kill checks while sleeping between attempts.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// How the update check handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Fixed number of attempts with constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier applied to the delay after each failure.
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    /// Five attempts, five seconds apart.
    fn default() -> Self {
        Self::fixed(
            DEFAULT_CHECK_ATTEMPTS,
            Duration::from_secs(DEFAULT_CHECK_DELAY_SECS),
        )
    }
}

impl RetryPolicy {
    /// Creates an exponential backoff policy with default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Creates a fixed retry policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based),
    /// or `None` when no attempts remain.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64) as u64;
                Some(Duration::from_millis(capped).min(*max_delay))
            }
        }
    }

    /// Maximum number of attempts for this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => (*max_attempts).max(1),
            Self::ExponentialBackoff { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    /// Run `op` until it succeeds, attempts run out, or `kill` fires.
    ///
    /// `op` receives the 1-based attempt number. Sleeps between attempts
    /// wake early on a kill request.
    pub fn run<T, E, F>(&self, kill: &CancellationToken, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            if kill.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let error = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            match self.delay_for_attempt(attempt) {
                Some(delay) => {
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Attempt failed, retrying");
                    if !sleep_unless_cancelled(kill, delay) {
                        return Err(RetryError::Cancelled);
                    }
                    attempt += 1;
                }
                None => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    })
                }
            }
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "no retry"),
            Self::Fixed {
                max_attempts,
                delay,
            } => write!(f, "{} attempts, {:?} apart", max_attempts, delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                ..
            } => write!(f, "{} attempts, backoff from {:?}", max_attempts, initial_delay),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// Every attempt failed; holds the last error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    /// A kill request interrupted the retries.
    #[error("cancelled")]
    Cancelled,
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The last error, unless the retries were cancelled.
    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Cancelled => None,
        }
    }
}

/// Sleep for `duration`, waking early on a kill request.
///
/// Returns `false` when the sleep was interrupted.
pub fn sleep_unless_cancelled(kill: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if kill.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
