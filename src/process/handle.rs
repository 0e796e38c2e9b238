use crate::config::{DescriptorSet, SupervisorSettings};
use crate::error::{Result, WardenError};
use crate::process::spawner::Launcher;
use crate::process::supervisor::{Command, OperationReport, Supervisor};
use crate::process::types::{InstanceInfo, LifecycleEvent};
use tokio::sync::{broadcast, mpsc, oneshot};

const COMMAND_BUFFER: usize = 64;

/// Cloneable control surface of a running supervisor.
///
/// Every method is a request to the control loop; dropping the last handle
/// makes the loop stop all instances and exit.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl SupervisorHandle {
    /// Start a control loop on the current tokio runtime
    pub fn spawn(launcher: Launcher, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let commands = Supervisor::spawn(launcher, events.clone(), COMMAND_BUFFER);
        Self { commands, events }
    }

    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        let launcher = Launcher::new(settings.log_dir.clone(), settings.max_log_size);
        Self::spawn(launcher, settings.event_buffer)
    }

    /// Launch every instance of each descriptor in `set`. Names that are
    /// already running are reported as rejected.
    pub async fn start(&self, set: DescriptorSet) -> Result<OperationReport> {
        self.request(|reply| Command::Start { set, reply }).await?
    }

    /// Stop every instance of `name`; resolves once all of them are stopped
    pub async fn stop(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::Stop { name, reply }).await?
    }

    /// Apply a new descriptor set: unchanged names are left alone, changed
    /// ones are replaced and missing ones are removed
    pub async fn reload(&self, set: DescriptorSet) -> Result<OperationReport> {
        self.request(|reply| Command::Reload { set, reply }).await?
    }

    pub async fn list(&self) -> Result<Vec<InstanceInfo>> {
        self.request(|reply| Command::List { reply }).await
    }

    /// Stop all instances and end the control loop
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Receive lifecycle events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        response.await.map_err(|_| WardenError::SupervisorGone)
    }
}
