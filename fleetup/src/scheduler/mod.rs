//! Trigger handling and throttling.
//!
//! Boot, timer and manual triggers all funnel through [`Scheduler`], which
//! guarantees at most one pass runs at a time and that passes are at least
//! `min_interval` apart within a process. [`PassLock`] extends the
//! single-flight guarantee across processes.
//!
//! ```text
//!   Boot ───────────────▶ ScheduleTimer { period }
//!
//!   Timer / Manual ──┬──▶ Busy        (a pass holds the RunPermit)
//!                    ├──▶ Throttled   (now - last_run < min_interval)
//!                    └──▶ Run(RunPermit)
//! ```

mod lock;
mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use lock::{LockHolder, PassLock, DEFAULT_STALE_LOCK_SECS};
pub use retry::{
    sleep_unless_cancelled, RetryError, RetryPolicy, DEFAULT_CHECK_ATTEMPTS,
    DEFAULT_CHECK_DELAY_SECS,
};

/// Default poll frequency (10 minutes).
pub const DEFAULT_FREQUENCY_MINUTES: u64 = 10;

/// Default minimum time between passes (1 minute).
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 60;

/// Source of a pass request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The agent started; (re)install the periodic timer.
    Boot,
    /// The periodic timer fired.
    Timer,
    /// An operator asked for a check.
    Manual,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Timer => "timer",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do about a trigger.
#[derive(Debug)]
pub enum Decision {
    /// Run a pass; keep the permit alive until it finishes.
    Run(RunPermit),
    /// A pass ran too recently.
    Throttled { since_last: Duration },
    /// Another pass is still running.
    Busy,
    /// Install the periodic timer, first tick now.
    ScheduleTimer { period: Duration },
}

#[derive(Debug, Default)]
struct SchedulerState {
    last_run: Option<Instant>,
    in_flight: bool,
}

/// Marks a pass in flight; dropping it frees the scheduler.
#[derive(Debug)]
pub struct RunPermit {
    state: Arc<Mutex<SchedulerState>>,
    trigger: Trigger,
}

impl RunPermit {
    /// Trigger that started the pass.
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.state.lock().in_flight = false;
    }
}

/// Minimum-interval, single-flight guard over pass triggers.
#[derive(Debug)]
pub struct Scheduler {
    min_interval: Duration,
    frequency: Mutex<Duration>,
    state: Arc<Mutex<SchedulerState>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_MIN_INTERVAL_SECS),
            Duration::from_secs(DEFAULT_FREQUENCY_MINUTES * 60),
        )
    }
}

impl Scheduler {
    pub fn new(min_interval: Duration, frequency: Duration) -> Self {
        Self {
            min_interval,
            frequency: Mutex::new(frequency),
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Timer period installed on `Boot`.
    pub fn frequency(&self) -> Duration {
        *self.frequency.lock()
    }

    /// Change the timer period. Takes effect on the next `Boot`.
    pub fn set_frequency(&self, frequency: Duration) {
        *self.frequency.lock() = frequency;
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Start time of the most recent pass.
    pub fn last_run(&self) -> Option<Instant> {
        self.state.lock().last_run
    }

    /// Decide what to do about a trigger arriving now.
    pub fn on_trigger(&self, trigger: Trigger) -> Decision {
        self.on_trigger_at(trigger, Instant::now())
    }

    /// Decide what to do about a trigger arriving at `now`.
    pub fn on_trigger_at(&self, trigger: Trigger, now: Instant) -> Decision {
        if trigger == Trigger::Boot {
            let period = self.frequency();
            tracing::info!(period_secs = period.as_secs(), "Installing update timer");
            return Decision::ScheduleTimer { period };
        }

        let mut state = self.state.lock();
        if state.in_flight {
            tracing::info!(%trigger, "Update pass already running, dropping trigger");
            return Decision::Busy;
        }
        if let Some(last) = state.last_run {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.min_interval {
                tracing::info!(
                    %trigger,
                    since_last_secs = since_last.as_secs(),
                    "Update pass ran recently, dropping trigger"
                );
                return Decision::Throttled { since_last };
            }
        }

        state.last_run = Some(now);
        state.in_flight = true;
        Decision::Run(RunPermit {
            state: Arc::clone(&self.state),
            trigger,
        })
    }
}
