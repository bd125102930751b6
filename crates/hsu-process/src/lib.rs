//! # HSU Process
//!
//! Low-level process operations for the HSU process supervisor.
//!
//! This crate provides:
//! - Process spawning with configurable output sinks
//! - Asynchronous, single-fire exit notification
//! - Signal delivery (interrupt and kill)
//! - Launch spec validation
//! - The [`ProcessLauncher`] / [`ChildProcess`] capability the supervisor
//!   is written against, with [`OsLauncher`] as the real implementation

pub mod control;
pub mod execute;
pub mod output;
pub mod terminate;
pub mod validation;

// Re-export main types
pub use control::{ChildProcess, ExitWatch, OsLauncher, ProcessLauncher};
pub use execute::{exit_outcome, spawn_child, ExecutionSpec, SpawnedChild};
pub use output::{OutputSink, SharedWriter};
pub use terminate::{force_kill, interrupt, signal_name};
pub use validation::*;
