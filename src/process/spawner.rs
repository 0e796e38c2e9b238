use crate::config::{ExecMode, ProcessDescriptor, StdioMode};
use crate::error::{Result, WardenError};
use crate::logs::{spawn_capture, LogWriter};
use crate::process::types::InstanceKey;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Name of the descriptor, exported to every instance
pub const ENV_APP_NAME: &str = "WARDEN_APP_NAME";
/// Instance index within its descriptor
pub const ENV_INSTANCE_ID: &str = "WARDEN_INSTANCE_ID";
/// Instance count, exported in cluster mode only
pub const ENV_POOL_SIZE: &str = "WARDEN_POOL_SIZE";

/// Metadata returned when launching an instance
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    pub key: InstanceKey,

    /// Output copier, present in `capture` mode
    pub capture: Option<JoinHandle<()>>,
}

/// Turns a validated descriptor into a running OS process
#[derive(Debug, Clone)]
pub struct Launcher {
    log_dir: PathBuf,
    max_log_size: u64,
}

impl Launcher {
    pub fn new(log_dir: impl Into<PathBuf>, max_log_size: u64) -> Self {
        Self {
            log_dir: log_dir.into(),
            max_log_size,
        }
    }

    /// Launch instance `index` of `descriptor`.
    ///
    /// The active profile is already resolved into the descriptor. Returns as
    /// soon as the process exists; a failure is reported once and never
    /// retried here.
    pub async fn launch(&self, descriptor: &ProcessDescriptor, index: usize) -> Result<SpawnedProcess> {
        let key = InstanceKey::new(descriptor.name.clone(), index);
        let mut command = build_command(descriptor, index);

        let writer = match descriptor.stdio {
            StdioMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                Some(
                    LogWriter::new(&self.log_dir, &key, self.max_log_size)
                        .await
                        .map_err(|e| WardenError::Launch(key.to_string(), e.to_string()))?,
                )
            }
            StdioMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                None
            }
            StdioMode::Null => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
                None
            }
        };

        let mut child = command
            .spawn()
            .map_err(|e| WardenError::Launch(key.to_string(), e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| WardenError::Launch(key.to_string(), "process exited before reporting a pid".to_string()))?;

        let capture = writer.map(|writer| spawn_capture(writer, child.stdout.take(), child.stderr.take()));

        tracing::debug!(
            "Launched {} (pid {}, mode {}, profile {})",
            key,
            pid,
            descriptor.exec_mode,
            descriptor.active_profile.as_deref().unwrap_or("-")
        );

        Ok(SpawnedProcess {
            child,
            pid,
            key,
            capture,
        })
    }
}

fn build_command(descriptor: &ProcessDescriptor, index: usize) -> Command {
    let (program, args) = descriptor.command_line();
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());

    if let Some(ref cwd) = descriptor.cwd {
        command.current_dir(cwd);
    }

    // The supervisor's own environment is inherited; descriptor layers go on top
    command.envs(descriptor.launch_env());
    command.env(ENV_APP_NAME, &descriptor.name);
    command.env(ENV_INSTANCE_ID, index.to_string());

    match descriptor.exec_mode {
        ExecMode::Fork => {
            command.process_group(0);
        }
        ExecMode::Cluster => {
            command.env(ENV_POOL_SIZE, descriptor.instances.to_string());
        }
    }

    command
}

/// Deliver `sig` to an instance. Fork-mode instances lead their own process
/// group, so the whole group is signalled. A process that is already gone is
/// not an error.
pub fn send_signal(pid: u32, exec_mode: ExecMode, sig: Signal) -> Result<()> {
    let target = Pid::from_raw(pid as i32);
    let result = match exec_mode {
        ExecMode::Fork => signal::killpg(target, sig),
        ExecMode::Cluster => signal::kill(target, sig),
    };

    match result {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(WardenError::SignalError(format!(
            "Failed to send {} to {}: {}",
            sig, pid, e
        ))),
    }
}
