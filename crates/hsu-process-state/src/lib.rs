//! # HSU Process State
//!
//! Lifecycle states of a supervised process, the table of legal transitions
//! between them, a bounded transition history, and the generic cooperative
//! runner that drives any state machine one state at a time.

pub mod runner;

pub use runner::{run, StateMachine};

use chrono::{DateTime, Utc};
use hsu_common::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of transitions kept in a [`TransitionLog`].
pub const MAX_HISTORY: usize = 100;

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Child spawned, waiting out the start timeout
    Starting,
    /// Child survived the start timeout
    Running,
    /// Interrupt sent, waiting for exit
    Stopping,
    /// Kill sent, waiting for exit
    Killing,
    /// Delay before another start attempt after an early exit
    Backoff,
    /// Delay before another start after a durable run ended
    Restarting,
    /// Terminal: supervision gave up
    Failed,
    /// Terminal: child gone, supervision finished
    Stopped,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Killing => "killing",
            ProcessState::Backoff => "backoff",
            ProcessState::Restarting => "restarting",
            ProcessState::Failed => "failed",
            ProcessState::Stopped => "stopped",
        }
    }

    /// Check if the process is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }

    /// Check if `self -> target` is a legal supervisor transition
    pub fn can_transition_to(&self, target: ProcessState) -> bool {
        use ProcessState::*;

        match (self, target) {
            (Starting, Running | Stopping | Backoff | Stopped | Failed) => true,
            (Running, Stopping | Restarting | Stopped) => true,
            (Stopping, Stopped | Killing | Failed) => true,
            (Killing, Stopped | Failed) => true,
            (Backoff, Starting | Stopping | Failed) => true,
            (Restarting, Starting | Stopping | Stopped | Failed) => true,
            // Terminal states have no successors
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a state transition with timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// `None` for the very first state of a run
    pub from: Option<ProcessState>,
    pub to: ProcessState,
    pub timestamp: DateTime<Utc>,
}

/// Validated, bounded record of the states a process went through.
#[derive(Debug, Clone)]
pub struct TransitionLog {
    process_id: String,
    current: Option<ProcessState>,
    history: VecDeque<StateTransition>,
    last_transition_time: Option<DateTime<Utc>>,
}

impl TransitionLog {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            current: None,
            history: VecDeque::new(),
            last_transition_time: None,
        }
    }

    pub fn current(&self) -> Option<ProcessState> {
        self.current
    }

    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    pub fn last_transition_time(&self) -> Option<DateTime<Utc>> {
        self.last_transition_time
    }

    /// Check if a transition from the current state to `target` is legal.
    /// A fresh log only accepts `Starting`.
    pub fn is_valid_transition(&self, target: ProcessState) -> bool {
        match self.current {
            None => target == ProcessState::Starting,
            Some(current) => current.can_transition_to(target),
        }
    }

    /// Record a transition, rejecting it if the table does not allow it.
    pub fn transition_to(&mut self, target: ProcessState) -> ProcessResult<()> {
        if !self.is_valid_transition(target) {
            return Err(ProcessError::invalid_state(
                &self.process_id,
                self.current.map_or("none", |s| s.as_str()),
                target.as_str(),
            ));
        }

        tracing::debug!(
            process = %self.process_id,
            from = %self.current.map_or("none", |s| s.as_str()),
            to = %target,
            "state transition"
        );

        self.record(target);
        Ok(())
    }

    /// Record a transition without consulting the table.
    ///
    /// Only for marking a run failed after its driver is gone.
    pub fn force_transition(&mut self, target: ProcessState) {
        tracing::warn!(
            process = %self.process_id,
            from = %self.current.map_or("none", |s| s.as_str()),
            to = %target,
            "forced state transition"
        );

        self.record(target);
    }

    fn record(&mut self, target: ProcessState) {
        let now = Utc::now();
        self.history.push_back(StateTransition {
            from: self.current,
            to: target,
            timestamp: now,
        });
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        self.current = Some(target);
        self.last_transition_time = Some(now);
    }

    /// Count recorded transitions into `state`
    pub fn count_transitions_to(&self, state: ProcessState) -> usize {
        self.history.iter().filter(|t| t.to == state).count()
    }

    /// Time spent in the current state, if any transition happened
    pub fn time_in_current_state(&self) -> Option<chrono::Duration> {
        self.last_transition_time.map(|at| Utc::now() - at)
    }
}
