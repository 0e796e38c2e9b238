use super::writer::{LogStream, LogWriter};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;

/// Copy an instance's piped output into its log files until both pipes close.
///
/// Output is copied as raw bytes; a pipe is only released at EOF so the
/// child never writes into a closed pipe.
pub fn spawn_capture(
    mut writer: LogWriter,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = stdout.map(Pipe::new);
        let mut stderr = stderr.map(Pipe::new);

        while stdout.is_some() || stderr.is_some() {
            let (stream, read) = tokio::select! {
                read = next_line(&mut stdout), if stdout.is_some() => (LogStream::Stdout, read),
                read = next_line(&mut stderr), if stderr.is_some() => (LogStream::Stderr, read),
            };

            match stream {
                LogStream::Stdout => consume(&mut writer, stream, &mut stdout, read).await,
                LogStream::Stderr => consume(&mut writer, stream, &mut stderr, read).await,
            }
        }

        if let Err(e) = writer.flush().await {
            tracing::warn!("Failed to flush captured output: {}", e);
        }
    })
}

struct Pipe<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> Pipe<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: Vec::new(),
        }
    }
}

/// Apply one read result: write the line, or release the pipe at EOF
async fn consume<R>(
    writer: &mut LogWriter,
    stream: LogStream,
    pipe: &mut Option<Pipe<R>>,
    read: std::io::Result<usize>,
) {
    match read {
        Ok(0) => *pipe = None,
        Ok(_) => {
            if let Some(pipe) = pipe.as_mut() {
                if let Err(e) = writer.write(stream, &pipe.line).await {
                    tracing::warn!("Dropping captured output: {}", e);
                }
                pipe.line.clear();
            }
        }
        Err(e) => {
            tracing::warn!("Error reading {} of managed process: {}", stream.suffix(), e);
            if let Some(pipe) = pipe.as_mut() {
                pipe.line.clear();
            }
        }
    }
}

/// Read up to and including the next newline; `Ok(0)` is EOF
async fn next_line<R>(pipe: &mut Option<Pipe<R>>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => pipe.reader.read_until(b'\n', &mut pipe.line).await,
        None => Ok(0),
    }
}
