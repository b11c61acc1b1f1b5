//! PID-file handling and process liveness checks.
//!
//! The web daemon's status is a pure function of two observable facts: the
//! PID file and the liveness of the process it names. Nothing here is cached;
//! callers recompute on every query.

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebServiceStatus {
    Running,
    Inactive,
    NoPidFile,
}

/// Reads the single-line PID file. Unparsable content yields `None`, which
/// callers treat the same as a dead process.
pub fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    let pid = content.trim().parse::<u32>().ok()?;
    tracing::trace!(pid, path = %path.display(), "Parsed PID file");
    Some(pid)
}

pub fn write_pid(path: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{pid}\n"))?;
    tracing::debug!(pid, path = %path.display(), "Wrote PID file");
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        } else {
            tracing::debug!(path = %path.display(), "Removed PID file");
        }
    }
}

/// Zero-effect signal probe. ESRCH means dead; any other outcome, including
/// permission denied, counts as alive so we never double-start a process we
/// may not own.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as i32, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn is_process_running(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(true)
}

/// Asks the process to exit gracefully (SIGTERM on unix).
#[cfg(unix)]
pub fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) {
    use std::process::Command;
    let _ = Command::new("taskkill").args(["/PID", &pid.to_string()]).status();
}

#[cfg(unix)]
pub fn kill_hard(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_hard(pid: u32) {
    use std::process::Command;
    let _ = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .status();
}

/// Derives the web daemon status from the PID file alone.
pub fn web_service_status(pid_path: &Path) -> WebServiceStatus {
    if !pid_path.exists() {
        return WebServiceStatus::NoPidFile;
    }
    match read_pid(pid_path) {
        Some(pid) if is_process_running(pid) => WebServiceStatus::Running,
        _ => WebServiceStatus::Inactive,
    }
}
