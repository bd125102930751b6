//! Entry point of a supervised run.

use crate::config::{ProcessConfig, TimeoutDefaults};
use crate::status::{ProcessSnapshot, ProcessStatus};
use crate::supervisor::Supervisor;
use hsu_common::{ProcessError, ProcessResult};
use hsu_process::{OsLauncher, OutputSink, ProcessLauncher};
use hsu_process_state::ProcessState;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A process ready to be supervised.
///
/// ```no_run
/// use hsu_process_supervisor::{Process, ProcessConfig, RestartPolicy};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let config = ProcessConfig {
///     args: vec!["30".to_string()],
///     restart_policy: RestartPolicy::OnFailure,
///     ..ProcessConfig::new("/bin/sleep")
/// };
///
/// let shutdown = CancellationToken::new();
/// let mut running = Process::new(config).run(&shutdown);
///
/// running.stop();
/// running.wait().await.unwrap();
/// println!("{:?}", running.status().last_error);
/// # }
/// ```
pub struct Process {
    config: ProcessConfig,
    stdout: OutputSink,
    stderr: OutputSink,
    launcher: Arc<dyn ProcessLauncher>,
    defaults: TimeoutDefaults,
}

impl Process {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            stdout: OutputSink::Discard,
            stderr: OutputSink::Discard,
            launcher: Arc::new(OsLauncher),
            defaults: TimeoutDefaults::default(),
        }
    }

    /// Sink for the child's stdout
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    /// Sink for the child's stderr, which also receives supervisor log lines
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Timeouts used where the config leaves them at zero
    pub fn with_defaults(mut self, defaults: TimeoutDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Start supervising.
    ///
    /// Returns immediately; the state machine runs on a background task.
    /// Cancelling `parent` has the same effect as [`RunningProcess::stop`].
    /// Must be called from within a tokio runtime.
    pub fn run(self, parent: &CancellationToken) -> RunningProcess {
        let config = self.config.normalized(&self.defaults);
        let id = config.display_name().to_string();
        let cancel = parent.child_token();
        let status = Arc::new(RwLock::new(ProcessStatus::new(&id)));

        debug!(
            process = %id,
            start_timeout = ?config.start_timeout,
            stop_timeout = ?config.stop_timeout,
            restart_policy = %config.restart_policy,
            "Supervising process"
        );

        let mut supervisor = Supervisor::new(
            config.clone(),
            self.stdout,
            self.stderr,
            self.launcher,
            Arc::clone(&status),
        );
        let driver_cancel = cancel.clone();
        let driver = tokio::spawn(async move { supervisor.drive(&driver_cancel).await });

        let (tx, rx) = oneshot::channel();
        let process_id = id.clone();
        let shared_status = Arc::clone(&status);
        tokio::spawn(async move {
            let result = match driver.await {
                Ok(Ok(state)) => {
                    debug!(process = %process_id, state = %state, "Supervision finished");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(process = %process_id, error = %e, "Supervision aborted");
                    shared_status.write().abort(e.clone());
                    Err(e)
                }
                Err(join_error) => {
                    let e = ProcessError::task_panic(&process_id, join_error.to_string());
                    error!(process = %process_id, error = %e, "Supervisor task died");
                    shared_status.write().abort(e.clone());
                    Err(e)
                }
            };

            if tx.send(result).is_err() {
                debug!(process = %process_id, "Nobody is waiting for the result");
            }
        });

        RunningProcess {
            id,
            config,
            status,
            stop: StopHandle { token: cancel },
            result: Some(rx),
        }
    }
}

/// Requests graceful shutdown of a supervised process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Ask the process to stop. Calling it again has no further effect.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to a supervised run.
///
/// Dropping the handle does not stop the process.
pub struct RunningProcess {
    id: String,
    config: ProcessConfig,
    status: Arc<RwLock<ProcessStatus>>,
    stop: StopHandle,
    result: Option<oneshot::Receiver<ProcessResult<()>>>,
}

impl RunningProcess {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Config of this run, with default timeouts applied.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Copy of the current status.
    pub fn status(&self) -> ProcessStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> Option<ProcessState> {
        self.status.read().state()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            config: self.config.clone(),
            status: self.status(),
        }
    }

    /// Wait for the run to reach a terminal state.
    ///
    /// Resolves to `Ok(())` however the process itself ended; see
    /// [`ProcessStatus::last_error`] for that. An error means the
    /// supervision machinery failed. The result is delivered once, later
    /// calls return [`ProcessError::CompletionChannelClosed`]. Cancel safe.
    pub async fn wait(&mut self) -> ProcessResult<()> {
        let Some(rx) = self.result.as_mut() else {
            return Err(ProcessError::completion_channel_closed(&self.id));
        };

        let result = rx
            .await
            .unwrap_or_else(|_| Err(ProcessError::completion_channel_closed(&self.id)));
        self.result = None;
        result
    }
}
