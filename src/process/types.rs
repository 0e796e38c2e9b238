use crate::config::{ExecMode, ProcessDescriptor};
use crate::process::monitor::ExitOutcome;
use crate::process::restart::RestartHistory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;

/// Identity of one instance slot: descriptor name plus instance index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub name: String,
    pub index: usize,
}

impl InstanceKey {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    RestartScheduled,
    GivenUp,
}

impl InstanceState {
    /// No further transition happens without an operator request
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::GivenUp)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Crashed => write!(f, "crashed"),
            InstanceState::RestartScheduled => write!(f, "restart-scheduled"),
            InstanceState::GivenUp => write!(f, "given-up"),
        }
    }
}

/// What the control loop does once a stopping instance has exited
#[derive(Debug, Clone)]
pub(crate) enum AfterStop {
    /// Stay in the registry as Stopped
    Remain,
    /// Launch a replacement from a newer descriptor in the same slot
    Replace(Arc<ProcessDescriptor>),
    /// Drop the slot from the registry
    Remove,
}

/// One instance slot owned by the control loop
#[derive(Debug)]
pub struct ManagedInstance {
    pub key: InstanceKey,
    pub descriptor: Arc<ProcessDescriptor>,
    /// Launch attempt currently bound to this slot; events for older
    /// attempts are stale
    pub attempt: u64,
    pub pid: Option<u32>,
    pub state: InstanceState,
    pub started_at: Option<Instant>,
    pub started_wall: Option<SystemTime>,
    pub last_exit: Option<ExitOutcome>,
    pub history: RestartHistory,
    pub(crate) after_stop: AfterStop,
    pub(crate) restart_timer: Option<JoinHandle<()>>,
    pub(crate) grace_timer: Option<JoinHandle<()>>,
}

impl ManagedInstance {
    pub fn new(key: InstanceKey, descriptor: Arc<ProcessDescriptor>, attempt: u64) -> Self {
        Self {
            key,
            descriptor,
            attempt,
            pid: None,
            state: InstanceState::Starting,
            started_at: None,
            started_wall: None,
            last_exit: None,
            history: RestartHistory::new(),
            after_stop: AfterStop::Remain,
            restart_timer: None,
            grace_timer: None,
        }
    }

    pub fn restarts(&self) -> usize {
        self.history.restart_count()
    }

    pub fn uptime(&self) -> Duration {
        match (self.state, self.started_at) {
            (InstanceState::Running | InstanceState::Stopping, Some(at)) => at.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Abort the pending backoff timer, if any
    pub(crate) fn cancel_restart(&mut self) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
    }

    pub(crate) fn cancel_grace(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            name: self.key.name.clone(),
            index: self.key.index,
            state: self.state,
            pid: self.pid,
            restarts: self.restarts(),
            uptime: self.uptime(),
            started_at: self.started_wall,
            exec_mode: self.descriptor.exec_mode,
            profile: self.descriptor.active_profile.clone(),
            last_exit: self.last_exit.clone(),
            cpu_usage: 0.0,
            memory_usage: 0,
        }
    }
}

/// Snapshot of an instance for status listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub index: usize,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub restarts: usize,
    pub uptime: Duration,
    pub started_at: Option<SystemTime>,
    pub exec_mode: ExecMode,
    pub profile: Option<String>,
    pub last_exit: Option<ExitOutcome>,
    pub cpu_usage: f32,
    pub memory_usage: u64,
}

/// Observable lifecycle transitions, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Launched { key: InstanceKey, pid: u32 },
    LaunchFailed { key: InstanceKey, error: String },
    Exited { key: InstanceKey, pid: u32, outcome: ExitOutcome },
    MonitorLost { key: InstanceKey, reason: String },
    RestartScheduled { key: InstanceKey, delay: Duration, restarts: usize },
    GivenUp { key: InstanceKey, reason: String },
    Stopping { key: InstanceKey },
    Killed { key: InstanceKey, pid: u32 },
    Stopped { key: InstanceKey },
    Removed { key: InstanceKey },
}

impl LifecycleEvent {
    pub fn key(&self) -> &InstanceKey {
        match self {
            LifecycleEvent::Launched { key, .. }
            | LifecycleEvent::LaunchFailed { key, .. }
            | LifecycleEvent::Exited { key, .. }
            | LifecycleEvent::MonitorLost { key, .. }
            | LifecycleEvent::RestartScheduled { key, .. }
            | LifecycleEvent::GivenUp { key, .. }
            | LifecycleEvent::Stopping { key }
            | LifecycleEvent::Killed { key, .. }
            | LifecycleEvent::Stopped { key }
            | LifecycleEvent::Removed { key } => key,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Launched { key, pid } => write!(f, "{} launched (pid {})", key, pid),
            LifecycleEvent::LaunchFailed { key, error } => {
                write!(f, "{} failed to launch: {}", key, error)
            }
            LifecycleEvent::Exited { key, pid, outcome } => {
                write!(f, "{} (pid {}) {}", key, pid, outcome)
            }
            LifecycleEvent::MonitorLost { key, reason } => {
                write!(f, "{} lost by monitor: {}", key, reason)
            }
            LifecycleEvent::RestartScheduled {
                key,
                delay,
                restarts,
            } => write!(
                f,
                "{} restart #{} in {}ms",
                key,
                restarts,
                delay.as_millis()
            ),
            LifecycleEvent::GivenUp { key, reason } => write!(f, "{} given up: {}", key, reason),
            LifecycleEvent::Stopping { key } => write!(f, "{} stopping", key),
            LifecycleEvent::Killed { key, pid } => {
                write!(f, "{} (pid {}) killed after grace period", key, pid)
            }
            LifecycleEvent::Stopped { key } => write!(f, "{} stopped", key),
            LifecycleEvent::Removed { key } => write!(f, "{} removed", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_key_display_and_order() {
        let a = InstanceKey::new("api", 1);
        let b = InstanceKey::new("api", 0);
        assert_eq!(a.to_string(), "api#1");
        assert!(b < a);
    }

    #[test]
    fn test_terminal_states() {
        assert!(InstanceState::Stopped.is_terminal());
        assert!(InstanceState::GivenUp.is_terminal());
        assert!(!InstanceState::Crashed.is_terminal());
        assert!(!InstanceState::RestartScheduled.is_terminal());
    }

    #[test]
    fn test_event_display() {
        let event = LifecycleEvent::RestartScheduled {
            key: InstanceKey::new("api", 0),
            delay: Duration::from_millis(1500),
            restarts: 2,
        };
        assert_eq!(event.to_string(), "api#0 restart #2 in 1500ms");
        assert_eq!(event.key().name, "api");
    }
}
