// IPC Client - Communicates with the daemon via Unix socket

use crate::error::{Result, WardenError};
use crate::ipc::protocol::{Command, Request, Response, ResponseData};
use crate::process::LifecycleEvent;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of connection retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command and return the daemon's answer, turning a
    /// daemon-side error into `Err`
    pub fn call(&self, command: Command) -> Result<ResponseData> {
        self.send_command(command)?
            .result
            .map_err(WardenError::IpcError)
    }

    /// Send a command to the daemon and wait for a response.
    ///
    /// Only connecting is retried: a request that reached the daemon is
    /// never sent twice.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request = Request::new(self.next_id(), command);
        let mut reader = self.open(&request)?;

        let response = read_response(&mut reader)?
            .ok_or_else(|| WardenError::ProtocolError("Daemon closed the connection".to_string()))?;

        if response.id != request.id {
            return Err(WardenError::ProtocolError(format!(
                "Response ID mismatch: expected {}, got {}",
                request.id, response.id
            )));
        }
        Ok(response)
    }

    /// Follow the lifecycle event stream, calling `on_event` for each event
    /// until it returns `false` or the daemon closes the stream
    pub fn follow_events<F>(&self, mut on_event: F) -> Result<()>
    where
        F: FnMut(LifecycleEvent) -> bool,
    {
        let request = Request::new(self.next_id(), Command::Events);
        let mut reader = self.open(&request)?;

        while let Some(response) = read_response(&mut reader)? {
            match response.result {
                Ok(ResponseData::Event(event)) => {
                    if !on_event(event) {
                        break;
                    }
                }
                Ok(other) => {
                    return Err(WardenError::ProtocolError(format!(
                        "Unexpected response in event stream: {:?}",
                        other
                    )))
                }
                Err(e) => return Err(WardenError::IpcError(e)),
            }
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Connect (with retries) and write the request line
    fn open(&self, request: &Request) -> Result<BufReader<UnixStream>> {
        let mut last_error = None;
        let mut stream = None;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.connect() {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(WardenError::DaemonNotRunning) => return Err(WardenError::DaemonNotRunning),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRY_ATTEMPTS {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }

        let mut stream = match stream {
            Some(stream) => stream,
            None => {
                return Err(last_error.unwrap_or_else(|| {
                    WardenError::IpcError("Failed to connect after retries".to_string())
                }))
            }
        };

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .and_then(|_| stream.flush())
            .map_err(|e| WardenError::IpcError(format!("Failed to write request: {}", e)))?;

        Ok(BufReader::new(stream))
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(WardenError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                WardenError::DaemonNotRunning
            } else {
                WardenError::IpcError(format!("Failed to connect to daemon: {}", e))
            }
        })
    }
}

/// Next response line, or `None` at end of stream
fn read_response(reader: &mut BufReader<UnixStream>) -> Result<Option<Response>> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| WardenError::IpcError(format!("Failed to read response: {}", e)))?;
    if read == 0 {
        return Ok(None);
    }

    serde_json::from_str(&line)
        .map(Some)
        .map_err(|e| WardenError::ProtocolError(format!("Failed to decode response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_with_custom_path() {
        let client = IpcClient::with_socket_path("/tmp/custom.sock");
        assert_eq!(client.socket_path(), Path::new("/tmp/custom.sock"));
    }

    #[test]
    fn test_request_ids_increase() {
        let client = IpcClient::with_socket_path("/tmp/custom.sock");
        let first = client.next_id();
        assert_eq!(client.next_id(), first + 1);
    }

    #[test]
    fn test_daemon_not_running_error() {
        let client = IpcClient::with_socket_path("/tmp/warden-nonexistent.sock");
        match client.send_command(Command::List) {
            Err(WardenError::DaemonNotRunning) => {}
            other => panic!("Expected DaemonNotRunning error, got: {:?}", other),
        }
    }
}
