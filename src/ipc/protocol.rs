// IPC Protocol definitions for client-daemon communication
//
// One JSON document per line. A connection carries a single request; the
// daemon answers with one response, except for `Events`, which is answered
// with one response per lifecycle event until the client hangs up.

use crate::process::{InstanceInfo, InstanceKey, LifecycleEvent, OperationReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// All available commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Load a descriptor file and start everything in it
    Start {
        config: PathBuf,
        profile: Option<String>,
    },
    Stop {
        name: String,
    },
    /// Load a descriptor file and reconcile the running set against it
    Reload {
        config: PathBuf,
        profile: Option<String>,
    },
    List,
    Logs {
        name: String,
        instance: Option<usize>,
        lines: usize,
    },
    /// Follow the lifecycle event stream
    Events,
    Status,
    Shutdown,
}

/// Captured output of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLogs {
    pub key: InstanceKey,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Result of a start or reload
    Applied(OperationReport),
    /// All instances of a name reached Stopped
    Stopped { name: String },
    InstanceList(Vec<InstanceInfo>),
    Logs(Vec<InstanceLogs>),
    /// One item of an `Events` stream
    Event(LifecycleEvent),
    DaemonStatus {
        pid: u32,
        uptime: Duration,
        instances: usize,
    },
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = Request::new(
            7,
            Command::Start {
                config: PathBuf::from("/srv/apps.toml"),
                profile: Some("production".to_string()),
            },
        );

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains('\n'));

        let decoded: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.command, request.command);
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(3, "Process not found: api".to_string());
        let json = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.id, 3);
        assert_eq!(decoded.result, Err("Process not found: api".to_string()));
    }

    #[test]
    fn test_event_response_carries_key() {
        let event = LifecycleEvent::Stopped {
            key: InstanceKey::new("api", 1),
        };
        let response = Response::success(1, ResponseData::Event(event.clone()));
        let decoded: Response =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();

        assert_eq!(decoded.result, Ok(ResponseData::Event(event)));
    }
}
