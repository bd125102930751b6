//! Error types for the HSU process supervisor.
//!
//! Every fallible operation in the workspace returns [`ProcessResult`].
//! Process-level failures (a child that could not be spawned, a signal that
//! could not be delivered, a child that exited abnormally) are ordinary
//! values: the supervisor stores them as the process's last error and keeps
//! driving its state machine. Only the machinery variants at the bottom of
//! [`ProcessError`] are ever reported to the caller of a supervised run.
//!
//! ```rust
//! use hsu_common::{ProcessError, ProcessResult};
//!
//! fn check(code: i32) -> ProcessResult<()> {
//!     if code != 0 {
//!         return Err(ProcessError::crashed("worker", code));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(0).is_ok());
//! assert!(check(3).unwrap_err().is_exit());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Process-specific error types for process supervision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    /// A signal could not be delivered to the child.
    #[error("Process stop failed: {id} - {reason}")]
    StopFailed { id: String, reason: String },

    /// The child exited on its own with a non-zero code.
    #[error("Process crashed: {id} - exit code {exit_code}")]
    Crashed { id: String, exit_code: i32 },

    /// The child was terminated by a signal.
    #[error("Process killed: {id} - {signal}")]
    Killed { id: String, signal: String },

    #[error("Process wait failed: {id} - {reason}")]
    WaitFailed { id: String, reason: String },

    #[error("failed to kill process {id}: still running {timeout:?} after kill signal")]
    Unkillable { id: String, timeout: Duration },

    #[error("maximum start attempts reached for {id} after {attempts} attempts (last error: {last_error})")]
    StartAttemptsExhausted {
        id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("maximum restarts reached for {id} after {restarts} restarts (last error: {last_error})")]
    RestartsExhausted {
        id: String,
        restarts: u32,
        last_error: String,
    },

    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },

    #[error("Process state error: {id} - invalid transition from {from} to {to}")]
    InvalidState {
        id: String,
        from: String,
        to: String,
    },

    #[error("Task panicked for process '{id}': {message}")]
    TaskPanic { id: String, message: String },

    #[error("Completion channel closed unexpectedly for process '{id}'")]
    CompletionChannelClosed { id: String },
}

impl ProcessError {
    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn crashed(id: impl Into<String>, exit_code: i32) -> Self {
        Self::Crashed {
            id: id.into(),
            exit_code,
        }
    }

    pub fn killed(id: impl Into<String>, signal: impl Into<String>) -> Self {
        Self::Killed {
            id: id.into(),
            signal: signal.into(),
        }
    }

    pub fn wait_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WaitFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn unkillable(id: impl Into<String>, timeout: Duration) -> Self {
        Self::Unkillable {
            id: id.into(),
            timeout,
        }
    }

    /// Wraps the error that ended the last start attempt.
    pub fn start_attempts_exhausted(
        id: impl Into<String>,
        attempts: u32,
        last_error: Option<&ProcessError>,
    ) -> Self {
        Self::StartAttemptsExhausted {
            id: id.into(),
            attempts,
            last_error: describe(last_error),
        }
    }

    /// Wraps the error that ended the last run.
    pub fn restarts_exhausted(
        id: impl Into<String>,
        restarts: u32,
        last_error: Option<&ProcessError>,
    ) -> Self {
        Self::RestartsExhausted {
            id: id.into(),
            restarts,
            last_error: describe(last_error),
        }
    }

    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn task_panic(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskPanic {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn completion_channel_closed(id: impl Into<String>) -> Self {
        Self::CompletionChannelClosed { id: id.into() }
    }

    /// True when the error describes how a child exited.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Crashed { .. } | Self::Killed { .. })
    }

    /// Exit code of a crashed child.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Crashed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

fn describe(error: Option<&ProcessError>) -> String {
    error.map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_construction() {
        let error = ProcessError::spawn_failed("worker", "executable not found");
        assert!(matches!(error, ProcessError::SpawnFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Process spawn failed: worker - executable not found"
        );

        let error = ProcessError::crashed("worker", 3);
        assert_eq!(error.exit_code(), Some(3));
        assert!(error.is_exit());

        let error = ProcessError::killed("worker", "SIGINT");
        assert!(error.is_exit());
        assert_eq!(error.exit_code(), None);
    }

    #[test]
    fn test_unkillable_message() {
        let error = ProcessError::unkillable("worker", Duration::from_millis(50));
        assert!(error.to_string().starts_with("failed to kill process worker"));
        assert!(!error.is_exit());
    }

    #[test]
    fn test_exhaustion_wraps_last_error() {
        let last = ProcessError::crashed("worker", 1);
        let error = ProcessError::start_attempts_exhausted("worker", 3, Some(&last));
        let message = error.to_string();
        assert!(message.contains("maximum start attempts reached"));
        assert!(message.contains("exit code 1"));

        let error = ProcessError::restarts_exhausted("worker", 2, None);
        assert!(error.to_string().contains("(last error: none)"));
    }
}
