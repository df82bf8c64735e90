//! OS-level process queries and signals

use tracing::debug;

/// Check if a process with the given PID exists
pub fn is_process_running(pid: u32) -> bool {
    debug!(pid, "is_process_running: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Signal 0 checks existence without affecting the process
        let result = kill(Pid::from_raw(pid as i32), None).is_ok() && !is_zombie(pid);
        debug!(pid, result, "is_process_running: unix check");
        result
    }

    #[cfg(windows)]
    {
        let result = std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| !o.stdout.is_empty() && !String::from_utf8_lossy(&o.stdout).contains("No tasks"))
            .unwrap_or(false);
        debug!(pid, result, "is_process_running: windows check");
        return result;
    }

    #[cfg(not(any(unix, windows)))]
    {
        debug!(pid, "is_process_running: unknown platform, assuming running");
        let _ = pid;
        true
    }
}

/// An exited process its parent has not reaped yet still answers signal 0
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        .is_some_and(|state| state == 'Z')
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Ask the process to terminate gracefully
///
/// Returns false when no graceful request could be delivered; the caller then
/// escalates to a forced kill.
pub fn terminate(pid: u32) -> bool {
    debug!(pid, "terminate: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                debug!(pid, error = %e, "terminate: SIGTERM failed");
                false
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!(pid, "terminate: no graceful signal on this platform");
        let _ = pid;
        false
    }
}

/// Kill the process outright
pub fn force_kill(pid: u32) -> bool {
    debug!(pid, "force_kill: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => true,
            Err(e) => {
                debug!(pid, error = %e, "force_kill: SIGKILL failed");
                false
            }
        }
    }

    #[cfg(windows)]
    {
        std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}

/// Exit code of a finished process; signal deaths map to the negated signal number
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
