//! Process execution primitives.
//!
//! [`spawn_child`] starts the child on the tokio runtime and hands ownership
//! of the `Child` to an exit monitor task. The monitor reaps the child and
//! publishes the exit outcome exactly once through an [`ExitWatch`].

use crate::control::ExitWatch;
use crate::output::OutputSink;
use crate::validation::validate_executable;
use hsu_common::{ProcessError, ProcessResult};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Everything needed to launch one child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSpec {
    /// Name used for errors and logs
    pub id: String,
    pub executable: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// `None` inherits the supervisor's environment, `Some` replaces it
    pub environment: Option<Vec<(String, String)>>,
}

/// A child spawned by [`spawn_child`].
#[derive(Debug)]
pub struct SpawnedChild {
    pub(crate) id: String,
    pub(crate) pid: Option<u32>,
    pub(crate) exit: ExitWatch,
    /// Set by the exit monitor once `wait` returned; signals are only sent
    /// while holding this lock and seeing `false`
    pub(crate) reaped: Arc<Mutex<bool>>,
}

/// Spawn a child process described by `spec`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_child(
    spec: &ExecutionSpec,
    stdout: &OutputSink,
    stderr: &OutputSink,
) -> ProcessResult<SpawnedChild> {
    validate_executable(&spec.executable)
        .map_err(|e| ProcessError::spawn_failed(&spec.id, e.to_string()))?;

    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.args);

    if let Some(ref dir) = spec.working_directory {
        cmd.current_dir(dir);
    }

    if let Some(ref environment) = spec.environment {
        cmd.env_clear();
        for (key, value) in environment {
            cmd.env(key, value);
        }
    }

    let stdout_stdio = stdout
        .stdio()
        .map_err(|e| ProcessError::spawn_failed(&spec.id, format!("stdout sink: {}", e)))?;
    let stderr_stdio = stderr
        .stdio()
        .map_err(|e| ProcessError::spawn_failed(&spec.id, format!("stderr sink: {}", e)))?;

    cmd.stdin(Stdio::null())
        .stdout(stdout_stdio)
        .stderr(stderr_stdio);

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::spawn_failed(&spec.id, e.to_string()))?;
    let pid = child.id();

    if let Some(out) = child.stdout.take() {
        stdout.forward(out, &spec.id, "stdout");
    }
    if let Some(err) = child.stderr.take() {
        stderr.forward(err, &spec.id, "stderr");
    }

    let (tx, exit) = ExitWatch::channel(&spec.id);
    let reaped = Arc::new(Mutex::new(false));

    let process_id = spec.id.clone();
    let monitor_reaped = Arc::clone(&reaped);
    tokio::spawn(async move {
        let outcome = match child.wait().await {
            Ok(status) => exit_outcome(&process_id, status),
            Err(e) => Err(ProcessError::wait_failed(&process_id, e.to_string())),
        };
        *monitor_reaped.lock() = true;

        match &outcome {
            Ok(()) => debug!(process = %process_id, pid = ?pid, "Process exited successfully"),
            Err(e) => debug!(process = %process_id, pid = ?pid, error = %e, "Process exited"),
        }

        if tx.send(outcome).is_err() {
            warn!(process = %process_id, "Exit outcome dropped, nobody is watching");
        }
    });

    info!(process = %spec.id, pid = ?pid, "Process spawned");

    Ok(SpawnedChild {
        id: spec.id.clone(),
        pid,
        exit,
        reaped,
    })
}

/// Map an exit status to the outcome reported by an [`ExitWatch`].
///
/// A zero exit is `Ok`; a non-zero code is [`ProcessError::Crashed`]; death
/// by signal is [`ProcessError::Killed`].
pub fn exit_outcome(id: &str, status: ExitStatus) -> ProcessResult<()> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        return Err(ProcessError::crashed(id, code));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return Err(ProcessError::killed(id, crate::terminate::signal_name(signal)));
        }
    }

    Err(ProcessError::wait_failed(
        id,
        format!("unrecognized exit status: {}", status),
    ))
}
