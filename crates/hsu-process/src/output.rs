//! Output sinks for a child's standard streams.
//!
//! A sink is handed to the child at spawn time. `Discard`, `Inherit` and
//! `File` are wired straight into the child's stdio; `Writer` gets a pipe
//! whose bytes a background task copies into the shared writer.

use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Writer shared between the supervisor and its forwarding tasks.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Destination for one of the child's output streams.
#[derive(Clone, Default)]
pub enum OutputSink {
    /// Output is dropped
    #[default]
    Discard,
    /// Child writes to the supervisor's own stream
    Inherit,
    /// Child writes directly into the file
    File(Arc<File>),
    /// Output is piped and copied into the writer
    Writer(SharedWriter),
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSink::Discard => f.write_str("Discard"),
            OutputSink::Inherit => f.write_str("Inherit"),
            OutputSink::File(file) => f.debug_tuple("File").field(file).finish(),
            OutputSink::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl OutputSink {
    pub fn file(file: File) -> Self {
        OutputSink::File(Arc::new(file))
    }

    pub fn writer<W: Write + Send + 'static>(writer: Arc<Mutex<W>>) -> Self {
        OutputSink::Writer(writer)
    }

    pub fn is_discard(&self) -> bool {
        matches!(self, OutputSink::Discard)
    }

    /// Stdio handle to give the child for this sink.
    pub fn stdio(&self) -> io::Result<Stdio> {
        Ok(match self {
            OutputSink::Discard => Stdio::null(),
            OutputSink::Inherit => Stdio::inherit(),
            OutputSink::File(file) => Stdio::from(file.try_clone()?),
            OutputSink::Writer(_) => Stdio::piped(),
        })
    }

    /// Best-effort write of a supervisor log line. Failures are ignored.
    ///
    /// An inherited sink writes to the supervisor's stderr.
    pub fn write_line(&self, line: &str) {
        let result = match self {
            OutputSink::Discard => Ok(()),
            OutputSink::Inherit => writeln!(io::stderr().lock(), "{}", line),
            OutputSink::File(file) => {
                let mut file: &File = file;
                writeln!(file, "{}", line)
            }
            OutputSink::Writer(writer) => {
                let mut writer = writer.lock();
                writeln!(writer, "{}", line).and_then(|_| writer.flush())
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "Dropped supervisor log line");
        }
    }

    /// Copy `stream` into the sink until EOF.
    ///
    /// Only `Writer` sinks receive piped streams; for any other sink the
    /// stream is dropped and no task is started.
    pub fn forward<R>(&self, stream: R, process_id: &str, stream_name: &'static str) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let writer = match self {
            OutputSink::Writer(writer) => Arc::clone(writer),
            _ => return None,
        };
        let process_id = process_id.to_string();

        Some(tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let mut writer = writer.lock();
                        if let Err(e) = writer.write_all(&line).and_then(|_| writer.flush()) {
                            warn!(process = %process_id, stream = stream_name, error = %e, "Failed to forward output");
                        }
                    }
                    Err(e) => {
                        warn!(process = %process_id, stream = stream_name, error = %e, "Error reading from stream");
                        break;
                    }
                }
            }
            debug!(process = %process_id, stream = stream_name, "Stream ended");
        }))
    }
}
