// Logs module - Capture and rotation of managed output

mod capture;
mod reader;
mod writer;

pub use capture::spawn_capture;
pub use reader::{log_paths, read_last_lines};
pub use writer::{LogStream, LogWriter};
