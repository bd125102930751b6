//! # HSU Process Supervisor
//!
//! Keeps one external process alive according to policy.
//!
//! A [`Process`] is built from a [`ProcessConfig`] (command, arguments,
//! environment, timeouts, restart policy) and started with
//! [`Process::run`]. The run drives a state machine through the
//! [`ProcessState`] lifecycle:
//!
//! ```text
//!            +--------- exit, policy restarts ---------+
//!            v                                         |
//! starting --+-- start timeout --> running --exit--> restarting
//!    |  ^                              |                  |
//!    |  +---- backoff <-- early exit   |                  |
//!    |                                 v                  v
//!    +---- cancel ---> stopping ---> killing ---> stopped / failed
//! ```
//!
//! The caller observes the run through the live [`ProcessStatus`] and gets
//! exactly one completion value from [`RunningProcess::wait`]. Process level
//! failures (spawn errors, crashes, an unkillable child) end up in the
//! status' last error; the completion value only reports failures of the
//! supervision machinery itself.

pub mod config;
pub mod process;
pub mod status;
mod supervisor;

pub use config::{ProcessConfig, RestartPolicy, TimeoutDefaults};
pub use hsu_common::{ProcessError, ProcessResult};
pub use hsu_process::{ChildProcess, OsLauncher, OutputSink, ProcessLauncher};
pub use hsu_process_state::ProcessState;
pub use process::{Process, RunningProcess, StopHandle};
pub use status::{ProcessSnapshot, ProcessStatus};
