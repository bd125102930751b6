//! Process control capability.
//!
//! The supervisor never touches `tokio::process` directly. It spawns through
//! a [`ProcessLauncher`] and drives the resulting [`ChildProcess`], which
//! lets tests substitute children that ignore signals or fail to receive
//! them.

use crate::execute::{spawn_child, ExecutionSpec, SpawnedChild};
use crate::output::OutputSink;
use crate::terminate;
use hsu_common::{ProcessError, ProcessResult};
use tokio::sync::oneshot;

/// Single-fire notification of a child's exit.
///
/// The outcome is `Ok(())` for a clean exit and an error describing the
/// abnormal exit otherwise. [`ExitWatch::recv`] is cancel safe and may be
/// called again after it completed; later calls return the same outcome.
#[derive(Debug)]
pub struct ExitWatch {
    id: String,
    rx: oneshot::Receiver<ProcessResult<()>>,
    outcome: Option<ProcessResult<()>>,
}

impl ExitWatch {
    /// Create a watch and the sender that reports the exit.
    pub fn channel(id: impl Into<String>) -> (oneshot::Sender<ProcessResult<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        let watch = Self {
            id: id.into(),
            rx,
            outcome: None,
        };
        (tx, watch)
    }

    /// Wait for the child to exit.
    pub async fn recv(&mut self) -> ProcessResult<()> {
        if let Some(ref outcome) = self.outcome {
            return outcome.clone();
        }

        let outcome = match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProcessError::wait_failed(
                &self.id,
                "exit monitor stopped without reporting",
            )),
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

}

/// Handle to one live (or already exited) child.
pub trait ChildProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Request graceful termination.
    fn send_interrupt(&self) -> ProcessResult<()>;

    /// Terminate forcefully.
    fn send_kill(&self) -> ProcessResult<()>;

    fn exit(&mut self) -> &mut ExitWatch;
}

/// Capability to start children.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(
        &self,
        spec: &ExecutionSpec,
        stdout: &OutputSink,
        stderr: &OutputSink,
    ) -> ProcessResult<Box<dyn ChildProcess>>;
}

/// Launcher backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn spawn(
        &self,
        spec: &ExecutionSpec,
        stdout: &OutputSink,
        stderr: &OutputSink,
    ) -> ProcessResult<Box<dyn ChildProcess>> {
        Ok(Box::new(spawn_child(spec, stdout, stderr)?))
    }
}

impl SpawnedChild {
    /// Send a signal unless the exit monitor already reaped the child.
    ///
    /// The check and the send happen under the monitor's lock, so a child is
    /// never signalled after the monitor recorded its exit. The pid is still
    /// signalled in the short gap between the kernel reaping the child inside
    /// `wait` and the monitor taking the lock.
    fn deliver(&self, send: fn(&str, u32) -> ProcessResult<()>) -> ProcessResult<()> {
        let reaped = self.reaped.lock();
        if *reaped {
            return Err(ProcessError::stop_failed(&self.id, "process already finished"));
        }
        let pid = self
            .pid
            .ok_or_else(|| ProcessError::stop_failed(&self.id, "process has no pid"))?;
        send(&self.id, pid)
    }
}

impl ChildProcess for SpawnedChild {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send_interrupt(&self) -> ProcessResult<()> {
        self.deliver(terminate::interrupt)
    }

    fn send_kill(&self) -> ProcessResult<()> {
        self.deliver(terminate::force_kill)
    }

    fn exit(&mut self) -> &mut ExitWatch {
        &mut self.exit
    }
}
