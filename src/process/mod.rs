// Process module - Launching, watching and restarting managed instances

mod handle;
pub mod monitor;
pub mod restart;
pub mod spawner;
mod supervisor;
mod types;

pub use handle::SupervisorHandle;
pub use monitor::{ExitOutcome, HealthMonitor, ResourceSampler, TerminationEvent, TerminationStream};
pub use restart::{decide, Crash, GiveUpReason, RestartDecision, RestartHistory, RestartPolicy};
pub use spawner::{send_signal, Launcher, SpawnedProcess};
pub use supervisor::OperationReport;
pub use types::{InstanceInfo, InstanceKey, InstanceState, LifecycleEvent, ManagedInstance};
