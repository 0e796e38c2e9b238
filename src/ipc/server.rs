// IPC Server - Listens for client connections and handles requests

use crate::error::{Result, WardenError};
use crate::ipc::protocol::{Command, Request, Response, ResponseData};
use crate::process::LifecycleEvent;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Notify};

/// What a handler produces for one command
pub enum Reply {
    /// A single response
    Data(ResponseData),
    /// Forward every event from this receiver until the client disconnects
    Stream(broadcast::Receiver<LifecycleEvent>),
    /// Answer, then end the accept loop
    Shutdown(ResponseData),
}

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
        }
    }

    /// Bind the Unix socket, replacing a stale socket file
    pub fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                WardenError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WardenError::IpcError(format!("Failed to create socket directory: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| WardenError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        // Owner only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                WardenError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        tracing::info!("Listening on {}", self.socket_path.display());
        self.listener = Some(listener);
        Ok(())
    }

    /// Run the accept loop. Each connection is served on its own task. The
    /// loop returns once a handler answered with [`Reply::Shutdown`] and that
    /// answer was written.
    pub async fn run<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send,
    {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| WardenError::IpcError("Server not started".to_string()))?;
        let handler = Arc::new(handler);
        let stopped = Arc::new(Notify::new());

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = stopped.notified() => {
                    tracing::info!("IPC server stopping on request");
                    return Ok(());
                }
            };

            let handler = Arc::clone(&handler);
            let stopped = Arc::clone(&stopped);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, handler.as_ref(), &stopped).await {
                    tracing::debug!("Connection ended with error: {}", e);
                }
            });
        }
    }

    /// Stop the server and clean up the socket file
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                WardenError::IpcError(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.listener.is_some() {
            let _ = self.stop();
        }
    }
}

async fn serve_connection<F, Fut>(stream: UnixStream, handler: &F, stopped: &Notify) -> Result<()>
where
    F: Fn(Command) -> Fut,
    Fut: Future<Output = Result<Reply>>,
{
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .map_err(|e| WardenError::IpcError(format!("Failed to read request: {}", e)))?;

    let request: Request = match serde_json::from_str(&request_line) {
        Ok(request) => request,
        Err(e) => {
            let response = Response::error(0, format!("Malformed request: {}", e));
            return write_response(&mut write_half, &response).await;
        }
    };

    tracing::debug!("IPC request {}: {:?}", request.id, request.command);

    match handler(request.command).await {
        Ok(Reply::Data(data)) => {
            write_response(&mut write_half, &Response::success(request.id, data)).await
        }
        Ok(Reply::Stream(mut events)) => loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged; skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            };

            let response = Response::success(request.id, ResponseData::Event(event));
            // A write error means the client went away
            write_response(&mut write_half, &response).await?;
        },
        Ok(Reply::Shutdown(data)) => {
            let written = write_response(&mut write_half, &Response::success(request.id, data)).await;
            // Stored as a permit if the accept loop is not waiting yet
            stopped.notify_one();
            written
        }
        Err(e) => write_response(&mut write_half, &Response::error(request.id, e.to_string())).await,
    }
}

async fn write_response(stream: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');

    stream
        .write_all(&line)
        .await
        .map_err(|e| WardenError::IpcError(format!("Failed to write response: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| WardenError::IpcError(format!("Failed to flush stream: {}", e)))
}
