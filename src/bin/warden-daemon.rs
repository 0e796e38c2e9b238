use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;
use warden::config::SupervisorSettings;
use warden::daemon::Daemon;
use warden::ipc::IpcServer;
use warden::process::SupervisorHandle;

/// Warden daemon - supervises processes and serves the control socket
#[derive(Parser)]
#[command(name = "warden-daemon", version, about)]
struct Args {
    /// Supervisor settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings =
        SupervisorSettings::load(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(socket) = args.socket {
        settings.socket_path = socket;
    }

    init_tracing(&settings.log_level);
    tracing::info!(
        "Starting warden daemon (pid {}, logs in {})",
        std::process::id(),
        settings.log_dir.display()
    );

    let supervisor = SupervisorHandle::from_settings(&settings);
    let mut server = IpcServer::with_socket_path(&settings.socket_path);
    server.start().context("Failed to start IPC server")?;

    let daemon = Arc::new(Daemon::new(supervisor.clone(), settings));

    tokio::select! {
        result = Arc::clone(&daemon).serve(&server) => {
            result.context("IPC server failed")?;
        }
        received = wait_for_signal() => {
            let name = received.context("Failed to install signal handlers")?;
            tracing::info!("Received {}, shutting down", name);
        }
    }

    // Already done when the shutdown came over IPC
    match supervisor.shutdown().await {
        Ok(()) | Err(warden::error::WardenError::SupervisorGone) => {}
        Err(e) => tracing::error!("Error during shutdown: {}", e),
    }

    server.stop().context("Failed to remove control socket")?;
    tracing::info!("Daemon shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}
