use crate::error::{Result, WardenError};
use crate::process::InstanceKey;
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub(super) fn suffix(self) -> &'static str {
        match self {
            LogStream::Stdout => "out",
            LogStream::Stderr => "err",
        }
    }
}

/// One append-only log file with its tracked size
struct LogFile {
    path: PathBuf,
    file: TokioFile,
    size: u64,
}

impl LogFile {
    fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                WardenError::LogError(format!("Failed to open {}: {}", path.display(), e))
            })?;

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path,
            file: TokioFile::from_std(file),
            size,
        })
    }

    /// Rename the current file with a timestamp and start a fresh one
    async fn rotate(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to flush log: {}", e)))?;

        let timestamp = Local::now().format("%Y%m%d-%H%M%S%3f").to_string();
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WardenError::LogError("Invalid log file name".to_string()))?;
        let rotated = self.path.with_file_name(format!("{}-{}.log", stem, timestamp));

        tokio::fs::rename(&self.path, &rotated)
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to rotate log: {}", e)))?;

        *self = Self::open(self.path.clone())?;
        Ok(())
    }
}

/// LogWriter handles writing stdout and stderr logs for a single instance
/// with automatic rotation based on file size
pub struct LogWriter {
    stdout: LogFile,
    stderr: LogFile,
    max_size: u64,
}

impl LogWriter {
    /// Open (or create) `<name>-<index>-out.log` and `<name>-<index>-err.log`
    pub async fn new(log_dir: &Path, key: &InstanceKey, max_size: u64) -> Result<Self> {
        tokio::fs::create_dir_all(log_dir)
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to create log directory: {}", e)))?;

        let (stdout_path, stderr_path) = super::log_paths(log_dir, key);

        Ok(Self {
            stdout: LogFile::open(stdout_path)?,
            stderr: LogFile::open(stderr_path)?,
            max_size,
        })
    }

    /// Write one timestamped entry to the given stream
    pub async fn write(&mut self, stream: LogStream, data: &[u8]) -> Result<()> {
        let max_size = self.max_size;
        let target = match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        };

        if target.size >= max_size {
            target.rotate().await?;
        }

        let entry = format_log_entry(&Local::now(), data);
        target
            .file
            .write_all(&entry)
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to write {} log: {}", stream.suffix(), e)))?;
        target.size += entry.len() as u64;

        Ok(())
    }

    pub fn path(&self, stream: LogStream) -> &Path {
        match stream {
            LogStream::Stdout => &self.stdout.path,
            LogStream::Stderr => &self.stderr.path,
        }
    }

    pub fn size(&self, stream: LogStream) -> u64 {
        match stream {
            LogStream::Stdout => self.stdout.size,
            LogStream::Stderr => self.stderr.size,
        }
    }

    /// Flush both log files to ensure all data is written
    pub async fn flush(&mut self) -> Result<()> {
        for file in [&mut self.stdout.file, &mut self.stderr.file] {
            file.flush()
                .await
                .map_err(|e| WardenError::LogError(format!("Failed to flush log: {}", e)))?;
        }
        Ok(())
    }
}

pub(super) fn file_name(key: &InstanceKey, stream: LogStream) -> String {
    format!("{}-{}-{}.log", key.name, key.index, stream.suffix())
}

/// Format: `[YYYY-MM-DD HH:MM:SS.mmm] <data>\n`
fn format_log_entry(timestamp: &DateTime<Local>, data: &[u8]) -> Vec<u8> {
    let timestamp_str = timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    let mut entry = Vec::with_capacity(timestamp_str.len() + 4 + data.len());

    entry.push(b'[');
    entry.extend_from_slice(timestamp_str.as_bytes());
    entry.extend_from_slice(b"] ");
    entry.extend_from_slice(data);

    if !data.ends_with(b"\n") {
        entry.push(b'\n');
    }

    entry
}
