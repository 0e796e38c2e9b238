use super::writer::{file_name, LogStream};
use crate::error::{Result, WardenError};
use crate::process::InstanceKey;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Paths of the stdout and stderr log files of an instance
pub fn log_paths(log_dir: &Path, key: &InstanceKey) -> (PathBuf, PathBuf) {
    (
        log_dir.join(file_name(key, LogStream::Stdout)),
        log_dir.join(file_name(key, LogStream::Stderr)),
    )
}

/// Read the last `lines` lines of a log file. A missing file reads as empty.
pub async fn read_last_lines(file_path: &Path, lines: usize) -> Result<Vec<String>> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(file_path)
        .await
        .map_err(|e| WardenError::LogError(format!("Failed to open log file: {}", e)))?;

    let mut tail = VecDeque::with_capacity(lines);
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    // Managed output is not guaranteed to be UTF-8
    while reader
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| WardenError::LogError(format!("Failed to read log line: {}", e)))?
        > 0
    {
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(|c: char| c == '\n' || c == '\r')
            .to_string();
        buf.clear();

        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    Ok(tail.into_iter().collect())
}
