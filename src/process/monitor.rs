use crate::error::WardenError;
use crate::process::types::InstanceKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Instant, SystemTime};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How an instance ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitOutcome {
    /// Exited on its own with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
    /// Waiting on the process failed; its fate is unknown
    Lost(String),
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitOutcome::Exited(code),
            (None, Some(signal)) => ExitOutcome::Signaled(signal),
            (None, None) => ExitOutcome::Lost(format!("unrecognised exit status {:?}", status)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exited with code {}", code),
            ExitOutcome::Signaled(signal) => write!(f, "killed by signal {}", signal),
            ExitOutcome::Lost(reason) => write!(f, "lost ({})", reason),
        }
    }
}

/// Emitted once per launched attempt when it terminates
#[derive(Debug, Clone)]
pub struct TerminationEvent {
    pub key: InstanceKey,
    pub attempt: u64,
    pub pid: u32,
    pub outcome: ExitOutcome,
    /// Monotonic time, used by the restart policy
    pub at: Instant,
    pub timestamp: SystemTime,
}

/// Watches launched instances and reports their termination.
///
/// Each watched child gets its own waiter task; all of them feed one
/// unbounded channel, so simultaneous exits are never dropped.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    tx: mpsc::UnboundedSender<TerminationEvent>,
}

/// The single consumer side of a [`HealthMonitor`]
#[derive(Debug)]
pub struct TerminationStream {
    rx: mpsc::UnboundedReceiver<TerminationEvent>,
}

impl TerminationStream {
    /// Wait for the next termination. Returns `None` only once every
    /// `HealthMonitor` clone and waiter task is gone.
    pub async fn next(&mut self) -> Option<TerminationEvent> {
        self.rx.recv().await
    }
}

impl HealthMonitor {
    pub fn new() -> (Self, TerminationStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, TerminationStream { rx })
    }

    /// Register a launched child. The returned task ends when the child does.
    pub fn watch(&self, key: InstanceKey, attempt: u64, mut child: Child) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let pid = child.id().unwrap_or(0);

        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from_status(status),
                Err(e) => ExitOutcome::Lost(
                    WardenError::Monitor(key.to_string(), e.to_string()).to_string(),
                ),
            };

            let event = TerminationEvent {
                key,
                attempt,
                pid,
                outcome,
                at: Instant::now(),
                timestamp: SystemTime::now(),
            };

            if tx.send(event).is_err() {
                tracing::debug!("Termination stream closed; dropping event for pid {}", pid);
            }
        })
    }
}

/// Samples CPU and memory usage of running instances
pub struct ResourceSampler {
    system: System,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// CPU percentage and resident memory (bytes) for each live pid
    pub fn sample(&mut self, pids: &[u32]) -> HashMap<u32, (f32, u64)> {
        let sys_pids: Vec<Pid> = pids.iter().map(|&pid| Pid::from_u32(pid)).collect();

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sys_pids),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        pids.iter()
            .filter_map(|&pid| {
                self.system
                    .process(Pid::from_u32(pid))
                    .map(|p| (pid, (p.cpu_usage(), p.memory())))
            })
            .collect()
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
