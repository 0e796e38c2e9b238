// Daemon core - Serves IPC commands against a running supervisor

use crate::config::{DescriptorSet, SupervisorSettings};
use crate::error::{Result, WardenError};
use crate::ipc::{Command, InstanceLogs, IpcServer, Reply, ResponseData};
use crate::logs::{log_paths, read_last_lines};
use crate::process::{InstanceKey, SupervisorHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Everything an IPC request needs from the daemon
pub struct Daemon {
    supervisor: SupervisorHandle,
    settings: SupervisorSettings,
    started: Instant,
}

impl Daemon {
    pub fn new(supervisor: SupervisorHandle, settings: SupervisorSettings) -> Self {
        Self {
            supervisor,
            settings,
            started: Instant::now(),
        }
    }

    /// Serve requests until a client asks for shutdown
    pub async fn serve(self: Arc<Self>, server: &IpcServer) -> Result<()> {
        server
            .run(move |command| {
                let daemon = Arc::clone(&self);
                async move { daemon.handle(command).await }
            })
            .await
    }

    pub async fn handle(&self, command: Command) -> Result<Reply> {
        let data = match command {
            Command::Start { config, profile } => {
                let set = self.load(&config, profile)?;
                ResponseData::Applied(self.supervisor.start(set).await?)
            }
            Command::Stop { name } => {
                self.supervisor.stop(name.clone()).await?;
                ResponseData::Stopped { name }
            }
            Command::Reload { config, profile } => {
                let set = self.load(&config, profile)?;
                ResponseData::Applied(self.supervisor.reload(set).await?)
            }
            Command::List => ResponseData::InstanceList(self.supervisor.list().await?),
            Command::Logs {
                name,
                instance,
                lines,
            } => ResponseData::Logs(self.logs(&name, instance, lines).await?),
            Command::Events => return Ok(Reply::Stream(self.supervisor.subscribe())),
            Command::Status => ResponseData::DaemonStatus {
                pid: std::process::id(),
                uptime: self.started.elapsed(),
                instances: self.supervisor.list().await?.len(),
            },
            Command::Shutdown => {
                tracing::info!("Shutdown requested over IPC");
                self.supervisor.shutdown().await?;
                return Ok(Reply::Shutdown(ResponseData::Success(
                    "Daemon stopped".to_string(),
                )));
            }
        };

        Ok(Reply::Data(data))
    }

    /// Load a descriptor file; without an explicit profile the configured
    /// default applies
    fn load(&self, config: &Path, profile: Option<String>) -> Result<DescriptorSet> {
        let profile = profile.or_else(|| self.settings.default_profile.clone());
        tracing::info!(
            "Loading {} (profile {})",
            config.display(),
            profile.as_deref().unwrap_or("-")
        );
        let set = DescriptorSet::load(config, profile.as_deref())?;
        if set.is_empty() {
            tracing::warn!(
                "{} has no valid descriptors ({} rejected)",
                config.display(),
                set.rejected.len()
            );
        }
        Ok(set)
    }

    async fn logs(&self, name: &str, instance: Option<usize>, lines: usize) -> Result<Vec<InstanceLogs>> {
        let keys: Vec<InstanceKey> = self
            .supervisor
            .list()
            .await?
            .into_iter()
            .filter(|info| info.name == name && instance.map_or(true, |i| i == info.index))
            .map(|info| InstanceKey::new(info.name, info.index))
            .collect();

        if keys.is_empty() {
            return Err(WardenError::ProcessNotFound(match instance {
                Some(index) => format!("{}#{}", name, index),
                None => name.to_string(),
            }));
        }

        let mut logs = Vec::with_capacity(keys.len());
        for key in keys {
            let (stdout_path, stderr_path) = log_paths(&self.settings.log_dir, &key);
            logs.push(InstanceLogs {
                stdout: read_last_lines(&stdout_path, lines).await?,
                stderr: read_last_lines(&stderr_path, lines).await?,
                key,
            });
        }
        Ok(logs)
    }
}
