//! Process liveness, termination, and lookup helpers
//!
//! Liveness is checked with signal 0. EPERM means the process exists but
//! belongs to another user, which still counts as alive; pids can be reused,
//! so callers that need stronger guarantees must pair this with a port or
//! command-line check.

use std::process::{Command, Output, Stdio};
use std::time::Duration;

use anyhow::Result;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::wait::wait_until;

const KILL_POLL: Duration = Duration::from_millis(100);

/// Check whether a process with this pid exists.
pub fn is_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Terminate a process: SIGTERM, wait up to `grace` for it to exit, then
/// SIGKILL any survivor.
pub fn terminate(pid: u32, grace: Duration) {
    let target = Pid::from_raw(pid as i32);
    let _ = kill(target, Signal::SIGTERM);

    if !wait_until(|| !is_alive(pid), KILL_POLL, grace) {
        debug!(pid, "process survived SIGTERM, sending SIGKILL");
        let _ = kill(target, Signal::SIGKILL);
    }
}

/// Find pids whose command line contains `needle`, excluding this process.
/// Used by the orphan sweep to locate tunnel processes a crashed invocation
/// never recorded.
pub fn find_by_cmdline(needle: &str) -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        find_by_cmdline_proc(needle)
    }

    #[cfg(not(target_os = "linux"))]
    {
        find_by_cmdline_pgrep(needle)
    }
}

#[cfg(target_os = "linux")]
fn find_by_cmdline_proc(needle: &str) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut matches = Vec::new();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return matches;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline: String = raw
            .split(|b| *b == 0)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" ");

        if cmdline.contains(needle) {
            matches.push(pid);
        }
    }

    matches
}

#[cfg(not(target_os = "linux"))]
fn find_by_cmdline_pgrep(needle: &str) -> Vec<u32> {
    let own_pid = std::process::id();
    let Ok(output) = Command::new("pgrep").args(["-f", needle]).output() else {
        return Vec::new();
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .filter(|pid| *pid != own_pid)
        .collect()
}

/// Run a command to completion with a deadline, capturing its output.
/// Returns `None` if the deadline expired (the child is killed first), so
/// callers can abandon an unresponsive external tool without hanging exit.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Option<Output>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let finished = wait_until(
        || matches!(child.try_wait(), Ok(Some(_))),
        KILL_POLL,
        timeout,
    );

    if !finished {
        debug!(?cmd, "command exceeded deadline, killing");
        let _ = child.kill();
        let _ = child.wait();
        return Ok(None);
    }

    Ok(Some(child.wait_with_output()?))
}
