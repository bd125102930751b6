//! # HSU Common
//!
//! Common types shared across the HSU process supervisor crates.
//!
//! This crate provides the error type every other crate reports through:
//! process-level failures (spawn, signal delivery, abnormal exit) as well
//! as supervisor machinery failures.

pub mod errors;

// Re-export commonly used items
pub use errors::{ProcessError, ProcessResult};
