use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of restarts within the sliding window
    pub max_restarts: usize,
    /// Sliding window for counting restarts
    pub window: Duration,
    /// Delay before the first restart of a crash streak
    pub base_delay: Duration,
    /// Upper bound for the exponential backoff
    pub max_delay: Duration,
    /// Uptime after which an instance counts as stable again
    pub min_uptime: Duration,
}

impl RestartPolicy {
    /// Create a new restart policy with default values
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_restarts: 10,
            window: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            min_uptime: Duration::from_secs(30),
        }
    }

    /// Backoff delay after `failures` consecutive short-lived runs.
    ///
    /// `base * 2^failures`, capped at `max_delay`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        2_u32
            .checked_pow(failures)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// What the control loop should do about a terminated instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    RestartNow,
    RestartAfter(Duration),
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Autorestart is turned off for the descriptor
    Disabled,
    /// Too many restarts inside the sliding window
    Exhausted { restarts: usize, window: Duration },
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUpReason::Disabled => write!(f, "autorestart disabled"),
            GiveUpReason::Exhausted { restarts, window } => write!(
                f,
                "{} restarts within {}s",
                restarts,
                window.as_secs()
            ),
        }
    }
}

/// The policy's view of one termination: when it happened and how long the
/// instance had been up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crash {
    pub at: Instant,
    pub uptime: Duration,
}

/// Tracks restart history for one instance slot
#[derive(Debug, Clone, Default)]
pub struct RestartHistory {
    /// When restarts were scheduled, oldest first
    restarts: VecDeque<Instant>,
    /// Crashes in a row that happened before `min_uptime`
    consecutive_failures: u32,
    /// Lifetime restart count (never decreases)
    total_restarts: usize,
}

impl RestartHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of restarts ever recorded
    pub fn restart_count(&self) -> usize {
        self.total_restarts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Count restarts within `window` before `now`
    pub fn restarts_within(&self, window: Duration, now: Instant) -> usize {
        self.restarts
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < window)
            .count()
    }

    /// Record that a restart was scheduled for `crash`
    pub fn record_restart(&mut self, policy: &RestartPolicy, crash: &Crash) {
        self.consecutive_failures = self.failures_before(policy, crash).saturating_add(1);
        self.total_restarts += 1;
        self.restarts.push_back(crash.at);

        while let Some(&oldest) = self.restarts.front() {
            if crash.at.saturating_duration_since(oldest) >= policy.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures_before(&self, policy: &RestartPolicy, crash: &Crash) -> u32 {
        if crash.uptime >= policy.min_uptime {
            0
        } else {
            self.consecutive_failures
        }
    }
}

/// Decide what to do about a crash. Pure: same inputs, same answer.
pub fn decide(policy: &RestartPolicy, history: &RestartHistory, crash: &Crash) -> RestartDecision {
    if !policy.enabled {
        return RestartDecision::GiveUp(GiveUpReason::Disabled);
    }

    let recent = history.restarts_within(policy.window, crash.at);
    if recent >= policy.max_restarts {
        return RestartDecision::GiveUp(GiveUpReason::Exhausted {
            restarts: recent,
            window: policy.window,
        });
    }

    let delay = policy.backoff_delay(history.failures_before(policy, crash));
    if delay.is_zero() {
        RestartDecision::RestartNow
    } else {
        RestartDecision::RestartAfter(delay)
    }
}
