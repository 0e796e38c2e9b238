// CLI module - User-facing command-line interface

mod output;

use crate::config::SupervisorSettings;
use crate::error::{Result, WardenError};
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::Command;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Warden - a small process supervisor
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon socket (defaults to the configured socket path)
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    /// Supervisor settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every process described in a descriptor file
    Start {
        /// TOML or JSON descriptor file
        file: PathBuf,

        /// Environment profile to apply (env_<profile>)
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Stop all instances of a process and wait until they are down
    Stop {
        name: String,
    },

    /// Reconcile the running set against a descriptor file
    Reload {
        file: PathBuf,

        #[arg(short, long)]
        env: Option<String>,
    },

    /// List all managed instances
    List,

    /// Show captured output of a process
    Logs {
        name: String,

        /// Only this instance index
        #[arg(short, long)]
        instance: Option<usize>,

        /// Number of lines to display per stream
        #[arg(short, long, default_value = "20")]
        lines: usize,
    },

    /// Follow lifecycle events as they happen
    Events,

    /// Check daemon status
    Status,

    /// Stop every instance and terminate the daemon
    Shutdown,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        let client = IpcClient::with_socket_path(self.socket_path()?);

        match self.command {
            Commands::Events => {
                output::print_info("Following lifecycle events (Ctrl-C to quit)");
                client.follow_events(|event| {
                    output::print_event(&event);
                    true
                })
            }
            Commands::Stop { ref name } => {
                let pb = output::create_progress_bar(&format!("Stopping {}", name));
                match client.call(self.build_command()?) {
                    Ok(data) => {
                        output::finish_progress_success(pb, &format!("{} stopped", name));
                        output::print_response(&data);
                        Ok(())
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, &format!("Failed to stop {}", name));
                        Err(e)
                    }
                }
            }
            Commands::Shutdown => {
                let pb = output::create_progress_bar("Shutting down daemon");
                match client.call(Command::Shutdown) {
                    Ok(_) => {
                        output::finish_progress_success(pb, "Daemon stopped");
                        Ok(())
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, "Shutdown failed");
                        Err(e)
                    }
                }
            }
            _ => {
                let data = client.call(self.build_command()?)?;
                output::print_response(&data);
                Ok(())
            }
        }
    }

    fn socket_path(&self) -> Result<PathBuf> {
        match self.socket {
            Some(ref socket) => Ok(socket.clone()),
            None => Ok(SupervisorSettings::load(self.config.as_deref())?.socket_path),
        }
    }

    /// Build an IPC command from the CLI arguments
    fn build_command(&self) -> Result<Command> {
        match &self.command {
            Commands::Start { file, env } => Ok(Command::Start {
                config: absolute(file)?,
                profile: env.clone(),
            }),
            Commands::Stop { name } => Ok(Command::Stop { name: name.clone() }),
            Commands::Reload { file, env } => Ok(Command::Reload {
                config: absolute(file)?,
                profile: env.clone(),
            }),
            Commands::List => Ok(Command::List),
            Commands::Logs {
                name,
                instance,
                lines,
            } => Ok(Command::Logs {
                name: name.clone(),
                instance: *instance,
                lines: *lines,
            }),
            Commands::Events => Ok(Command::Events),
            Commands::Status => Ok(Command::Status),
            Commands::Shutdown => Ok(Command::Shutdown),
        }
    }
}

/// Print a failed command the way the CLI prints every error
pub fn report_error(error: &WardenError) {
    match error {
        WardenError::DaemonNotRunning => {
            output::print_error("Daemon not running (start it with `warden-daemon`)")
        }
        other => output::print_error(&other.to_string()),
    }
}

/// The daemon runs elsewhere, so descriptor paths are sent absolute
fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| {
        WardenError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_start_with_profile() {
        let cli = Cli::try_parse_from(["warden", "start", "apps.toml", "--env", "production"]).unwrap();
        match cli.command {
            Commands::Start { file, env } => {
                assert_eq!(file, PathBuf::from("apps.toml"));
                assert_eq!(env.as_deref(), Some("production"));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_parse_logs_defaults() {
        let cli = Cli::try_parse_from(["warden", "logs", "api"]).unwrap();
        match cli.build_command().unwrap() {
            Command::Logs {
                name,
                instance,
                lines,
            } => {
                assert_eq!(name, "api");
                assert_eq!(instance, None);
                assert_eq!(lines, 20);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_path_is_made_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("apps.toml");
        std::fs::write(&file, "name = \"x\"\nscript = \"/bin/true\"\n").unwrap();

        let resolved = absolute(&file).unwrap();
        assert!(resolved.is_absolute());
        assert!(absolute(Path::new("/nonexistent/apps.toml")).is_err());
    }

    #[test]
    fn test_explicit_socket_wins() {
        let cli = Cli::try_parse_from(["warden", "--socket", "/tmp/other.sock", "list"]).unwrap();
        assert_eq!(cli.socket_path().unwrap(), PathBuf::from("/tmp/other.sock"));
    }
}
