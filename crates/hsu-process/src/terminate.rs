//! Process termination primitives.
//!
//! Signals are delivered directly to the tracked child's pid; process groups
//! and sessions are left alone.

use hsu_common::{ProcessError, ProcessResult};

/// Ask a process to shut down (SIGINT).
pub fn interrupt(id: &str, pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        send_signal(id, pid, nix::sys::signal::Signal::SIGINT)
    }

    #[cfg(not(unix))]
    {
        Err(unsupported(id, pid))
    }
}

/// Force kill a process (SIGKILL).
pub fn force_kill(id: &str, pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        send_signal(id, pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    {
        Err(unsupported(id, pid))
    }
}

#[cfg(unix)]
fn send_signal(id: &str, pid: u32, signal: nix::sys::signal::Signal) -> ProcessResult<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| ProcessError::stop_failed(id, format!("invalid pid {}", pid)))?;

    kill(Pid::from_raw(raw), signal).map_err(|e| {
        ProcessError::stop_failed(id, format!("failed to send {} to pid {}: {}", signal.as_str(), pid, e))
    })
}

#[cfg(not(unix))]
fn unsupported(id: &str, pid: u32) -> ProcessError {
    ProcessError::stop_failed(
        id,
        format!("signal delivery to pid {} is not supported on this platform", pid),
    )
}

/// Human readable name of a signal number, e.g. `SIGTERM`.
pub fn signal_name(signal: i32) -> String {
    #[cfg(unix)]
    {
        nix::sys::signal::Signal::try_from(signal)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {}", signal))
    }

    #[cfg(not(unix))]
    {
        format!("signal {}", signal)
    }
}
