//! The supervisor state machine.
//!
//! One [`Supervisor`] owns one child at a time and implements
//! [`StateMachine`] over [`ProcessState`]. Every waiting state races up to
//! three events (the child's exit, cancellation, and a timer) and picks its
//! successor from whichever fires first.

use crate::config::ProcessConfig;
use crate::status::ProcessStatus;
use async_trait::async_trait;
use chrono::Utc;
use hsu_common::{ProcessError, ProcessResult};
use hsu_process::{ChildProcess, OutputSink, ProcessLauncher};
use hsu_process_state::{ProcessState, StateMachine};
use parking_lot::RwLock;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(test)]
mod tests;

/// Event that ended a wait.
enum Wake {
    Cancelled,
    Exited(ProcessResult<()>),
    Elapsed,
}

pub(crate) struct Supervisor {
    id: String,
    config: ProcessConfig,
    stdout: OutputSink,
    stderr: OutputSink,
    launcher: Arc<dyn ProcessLauncher>,
    status: Arc<RwLock<ProcessStatus>>,
    child: Option<Box<dyn ChildProcess>>,
}

impl Supervisor {
    /// `config` must already be normalized.
    pub(crate) fn new(
        config: ProcessConfig,
        stdout: OutputSink,
        stderr: OutputSink,
        launcher: Arc<dyn ProcessLauncher>,
        status: Arc<RwLock<ProcessStatus>>,
    ) -> Self {
        Self {
            id: config.display_name().to_string(),
            config,
            stdout,
            stderr,
            launcher,
            status,
            child: None,
        }
    }

    /// Drive the machine from `starting` until a terminal state.
    ///
    /// The shared status is moved into each state before its logic runs.
    pub(crate) async fn drive(&mut self, cancel: &CancellationToken) -> ProcessResult<ProcessState> {
        let status = Arc::clone(&self.status);
        hsu_process_state::run(self, ProcessState::Starting, cancel, move |state| {
            status.write().enter(state)
        })
        .await
    }

    /// Best-effort supervisor log line on the stderr sink.
    fn log_line(&self, event: &str) {
        self.stderr.write_line(&format!(
            "{} {} {}",
            Utc::now().to_rfc3339(),
            self.config.cmd,
            event
        ));
    }

    fn set_last_error(&self, error: Option<ProcessError>) {
        self.status.write().last_error = error;
    }

    async fn wait(&mut self, cancel: Option<&CancellationToken>, timeout: Option<Duration>) -> Wake {
        tokio::select! {
            _ = cancelled(cancel) => Wake::Cancelled,
            outcome = child_exit(self.child.as_mut()) => Wake::Exited(outcome),
            _ = elapsed(timeout) => Wake::Elapsed,
        }
    }

    /// Forget the exited child and store its outcome as the last error.
    fn record_exit(&mut self, outcome: ProcessResult<()>) -> ProcessResult<()> {
        self.child = None;

        match outcome {
            Ok(()) => {
                info!(process = %self.id, "Process exited");
                self.log_line("finished");
            }
            Err(ref e) => {
                warn!(process = %self.id, error = %e, "Process exited with error");
                self.log_line(&format!("finished with error: {}", e));
            }
        }

        let mut status = self.status.write();
        status.pid = None;
        status.last_error = outcome.clone().err();
        outcome
    }

    /// Successor after the child exited while starting or running.
    fn after_exit(&mut self, outcome: ProcessResult<()>, restart: ProcessState) -> ProcessState {
        let outcome = self.record_exit(outcome);
        if self.config.restart_policy.should_restart(&outcome) {
            restart
        } else {
            ProcessState::Stopped
        }
    }

    async fn starting(&mut self, cancel: &CancellationToken) -> ProcessState {
        self.log_line("starting");
        info!(
            process = %self.id,
            cmd = %self.config.cmd,
            attempt = self.status.read().start_attempt,
            "Starting process"
        );

        let spawned = self
            .config
            .execution_spec()
            .and_then(|spec| self.launcher.spawn(&spec, &self.stdout, &self.stderr));

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(process = %self.id, error = %e, "Failed to start process");
                self.log_line(&format!("error starting: {}", e));
                self.set_last_error(Some(e));
                return ProcessState::Failed;
            }
        };
        self.status.write().pid = child.pid();
        self.child = Some(child);

        let timeout = self.config.start_timeout;
        match self.wait(Some(cancel), Some(timeout)).await {
            Wake::Cancelled => {
                info!(process = %self.id, "Cancelled while starting");
                ProcessState::Stopping
            }
            Wake::Exited(outcome) => self.after_exit(outcome, ProcessState::Backoff),
            Wake::Elapsed => {
                let mut status = self.status.write();
                status.start_attempt = 0;
                status.last_error = None;
                info!(process = %self.id, pid = ?status.pid, "Process started");
                ProcessState::Running
            }
        }
    }

    async fn running(&mut self, cancel: &CancellationToken) -> ProcessState {
        match self.wait(Some(cancel), None).await {
            Wake::Exited(outcome) => self.after_exit(outcome, ProcessState::Restarting),
            // No timer runs here, only cancellation can end the wait otherwise
            Wake::Cancelled | Wake::Elapsed => {
                info!(process = %self.id, "Received cancel signal");
                self.log_line("received cancel signal");
                ProcessState::Stopping
            }
        }
    }

    async fn stopping(&mut self) -> ProcessState {
        let sent = match self.child.as_deref() {
            Some(child) => {
                info!(process = %self.id, pid = ?child.pid(), "Sending interrupt");
                child.send_interrupt()
            }
            None => Err(ProcessError::stop_failed(&self.id, "process already finished")),
        };

        self.log_line("stopping");
        if let Err(e) = sent {
            return self.signal_failed(e);
        }

        let timeout = self.config.stop_timeout;
        match self.wait(None, Some(timeout)).await {
            Wake::Exited(outcome) => {
                self.record_exit(outcome);
                ProcessState::Stopped
            }
            Wake::Elapsed | Wake::Cancelled => {
                warn!(process = %self.id, timeout = ?timeout, "Process did not stop in time");
                ProcessState::Killing
            }
        }
    }

    async fn killing(&mut self) -> ProcessState {
        let sent = match self.child.as_deref() {
            Some(child) => {
                warn!(process = %self.id, pid = ?child.pid(), "Sending kill");
                child.send_kill()
            }
            None => Err(ProcessError::stop_failed(&self.id, "process already finished")),
        };

        self.log_line("killing");
        if let Err(e) = sent {
            return self.signal_failed(e);
        }

        let timeout = self.config.kill_timeout;
        match self.wait(None, Some(timeout)).await {
            Wake::Exited(outcome) => {
                self.record_exit(outcome);
                ProcessState::Stopped
            }
            Wake::Elapsed | Wake::Cancelled => {
                let e = ProcessError::unkillable(&self.id, timeout);
                error!(process = %self.id, error = %e, "Giving up on process");
                self.log_line(&e.to_string());
                self.set_last_error(Some(e));
                ProcessState::Failed
            }
        }
    }

    /// A signal could not be delivered, including to a child that is
    /// already gone.
    fn signal_failed(&self, e: ProcessError) -> ProcessState {
        error!(process = %self.id, error = %e, "Failed to signal process");
        self.log_line(&format!("error stopping: {}", e));
        self.set_last_error(Some(e));
        ProcessState::Failed
    }

    async fn backoff(&mut self, cancel: &CancellationToken) -> ProcessState {
        let (attempts, last_error) = {
            let mut status = self.status.write();
            status.start_attempt += 1;
            (status.start_attempt, status.last_error.clone())
        };

        let max = self.config.max_start_attempts;
        if max > 0 && attempts >= max {
            let e = ProcessError::start_attempts_exhausted(&self.id, attempts, last_error.as_ref());
            error!(process = %self.id, error = %e, "Giving up on process");
            self.log_line(&e.to_string());
            self.set_last_error(Some(e));
            return ProcessState::Failed;
        }

        let delay = self.config.backoff_timeout;
        info!(process = %self.id, attempt = attempts, delay = ?delay, "Backing off before next start");
        self.delay(cancel, delay).await
    }

    async fn restarting(&mut self, cancel: &CancellationToken) -> ProcessState {
        let (restarts, last_error) = {
            let mut status = self.status.write();
            status.restart_count += 1;
            (status.restart_count, status.last_error.clone())
        };

        let max = self.config.max_restarts;
        if max > 0 && restarts >= max {
            let Some(last_error) = last_error else {
                info!(process = %self.id, restarts, "Restart limit reached");
                return ProcessState::Stopped;
            };
            let e = ProcessError::restarts_exhausted(&self.id, restarts, Some(&last_error));
            error!(process = %self.id, error = %e, "Giving up on process");
            self.log_line(&e.to_string());
            self.set_last_error(Some(e));
            return ProcessState::Failed;
        }

        let delay = self.config.restart_timeout;
        info!(process = %self.id, restart = restarts, delay = ?delay, "Restarting process");
        self.delay(cancel, delay).await
    }

    /// Wait out a delay before the next start.
    async fn delay(&mut self, cancel: &CancellationToken, delay: Duration) -> ProcessState {
        match self.wait(Some(cancel), Some(delay)).await {
            Wake::Cancelled => ProcessState::Stopping,
            // The child is gone by now, so only the timer is left
            Wake::Elapsed | Wake::Exited(_) => {
                self.set_last_error(None);
                ProcessState::Starting
            }
        }
    }

    fn finish(&mut self, state: ProcessState) {
        let status = self.status.read();
        match status.last_error {
            Some(ref e) if state == ProcessState::Failed => {
                error!(process = %self.id, error = %e, "Process supervision failed")
            }
            Some(ref e) => info!(process = %self.id, error = %e, "Process stopped"),
            None => info!(process = %self.id, "Process stopped"),
        }
        drop(status);
        self.log_line(state.as_str());
    }
}

#[async_trait]
impl StateMachine for Supervisor {
    type State = ProcessState;
    type Error = ProcessError;

    async fn step(
        &mut self,
        state: ProcessState,
        cancel: &CancellationToken,
    ) -> ProcessResult<Option<ProcessState>> {
        let next = match state {
            ProcessState::Starting => self.starting(cancel).await,
            ProcessState::Running => self.running(cancel).await,
            ProcessState::Stopping => self.stopping().await,
            ProcessState::Killing => self.killing().await,
            ProcessState::Backoff => self.backoff(cancel).await,
            ProcessState::Restarting => self.restarting(cancel).await,
            ProcessState::Failed | ProcessState::Stopped => {
                self.finish(state);
                return Ok(None);
            }
        };
        Ok(Some(next))
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}

async fn child_exit(child: Option<&mut Box<dyn ChildProcess>>) -> ProcessResult<()> {
    match child {
        Some(child) => child.exit().recv().await,
        None => pending().await,
    }
}

async fn elapsed(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => pending().await,
    }
}
