//! Process validation utilities.
//!
//! Validation functions for launch specs.

use hsu_common::{ProcessError, ProcessResult};

/// Validate that an executable path is usable for spawning.
pub fn validate_executable(path: &str) -> ProcessResult<()> {
    if path.is_empty() {
        return Err(ProcessError::configuration(
            "validation",
            "Executable path cannot be empty",
        ));
    }

    if path.contains('\0') {
        return Err(ProcessError::configuration(
            "validation",
            "Executable path cannot contain NUL bytes",
        ));
    }

    Ok(())
}

/// Validate process name format.
pub fn validate_process_id(id: &str) -> ProcessResult<()> {
    if id.is_empty() {
        return Err(ProcessError::configuration(
            "validation",
            "Process ID cannot be empty",
        ));
    }

    if !id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(ProcessError::configuration(
            id,
            "Process ID can only contain alphanumeric characters, dots, hyphens, and underscores",
        ));
    }

    Ok(())
}

/// Split a `KEY=VALUE` environment entry.
pub fn parse_env_entry(entry: &str) -> ProcessResult<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ProcessError::configuration(
            "validation",
            format!("Environment entry must have the form KEY=VALUE: {:?}", entry),
        )),
    }
}
