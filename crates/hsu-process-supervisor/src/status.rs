//! Live status of a supervised process.

use crate::config::ProcessConfig;
use hsu_common::{ProcessError, ProcessResult};
use hsu_process_state::{ProcessState, TransitionLog};
use serde::{Serialize, Serializer};

/// Run-time fields of a supervised process.
///
/// Written only by the supervisor driving the process; callers read it
/// through [`crate::RunningProcess::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    /// Consecutive start attempts that ended before the start timeout
    pub start_attempt: u32,
    /// Restarts after a successful start
    pub restart_count: u32,
    state: Option<ProcessState>,
    #[serde(serialize_with = "error_message")]
    pub last_error: Option<ProcessError>,
    /// Pid of the live child, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip)]
    transitions: TransitionLog,
}

impl ProcessStatus {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            start_attempt: 0,
            restart_count: 0,
            state: None,
            last_error: None,
            pid: None,
            transitions: TransitionLog::new(process_id),
        }
    }

    /// State currently executing, `None` before the run began.
    pub fn state(&self) -> Option<ProcessState> {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.map_or(false, |s| s.is_terminal())
    }

    /// Bounded history of the states this run went through.
    pub fn transitions(&self) -> &TransitionLog {
        &self.transitions
    }

    /// Record entry into `state`. Illegal transitions are rejected.
    pub(crate) fn enter(&mut self, state: ProcessState) -> ProcessResult<()> {
        self.transitions.transition_to(state)?;
        self.state = Some(state);
        Ok(())
    }

    /// Mark the run failed after its driver died.
    pub(crate) fn abort(&mut self, error: ProcessError) {
        if !self.is_terminal() {
            self.transitions.force_transition(ProcessState::Failed);
            self.state = Some(ProcessState::Failed);
        }
        self.pid = None;
        self.last_error = Some(error);
    }
}

fn error_message<S>(error: &Option<ProcessError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Configuration and status of a process at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    #[serde(flatten)]
    pub config: ProcessConfig,
    #[serde(flatten)]
    pub status: ProcessStatus,
}
