//! Sync engine adapter
//!
//! Drives mutagen sessions over the tunnel. The engine is a black box: we
//! create, list, terminate, flush, and reset sessions through its CLI and
//! parse its textual status report. Per-session state machine:
//! absent -> initializing -> { watching | error }, with watching ->
//! conflicted as a non-terminal side state.

pub mod error;
pub mod status;

use std::path::Path;
use std::process::Command;
use std::time::Duration;

pub use error::{Result, SyncError};
pub use status::{parse_session_status, SessionStatus, SyncState, CONFLICT_SAMPLE_CAP};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::process::run_with_timeout;
use crate::wait::wait_until;

const SESSION_PREFIX: &str = "sandlink-";
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);
const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn session_name(resource: &str) -> String {
    format!("{}{}", SESSION_PREFIX, resource)
}

pub struct SyncEngine {
    bin: String,
    create_timeout: Duration,
    poll_interval: Duration,
    flush_timeout: Duration,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            bin: "mutagen".to_string(),
            create_timeout: Duration::from_secs(config.create_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            flush_timeout: Duration::from_secs(config.flush_timeout_secs),
        }
    }

    pub fn is_installed(&self) -> bool {
        Command::new(&self.bin)
            .arg("version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Current status of this resource's session, parsed from the engine's
    /// report. Listing is local to this host and cheap.
    pub fn status(&self, resource: &str) -> Result<SessionStatus> {
        let output = Command::new(&self.bin).args(["sync", "list", "-l"]).output()?;
        if !output.status.success() {
            // An empty session list makes some engine versions exit non-zero
            return Ok(SessionStatus::absent());
        }

        let report = String::from_utf8_lossy(&output.stdout);
        Ok(parse_session_status(&report, &session_name(resource)))
    }

    /// Create the session, replacing any stale one under the same name.
    /// Conflict-aware two-way mode is non-negotiable: a recreated session
    /// has no merge baseline, and silently resolving divergence would
    /// destroy unsynchronized remote-side work.
    pub fn create(
        &self,
        resource: &str,
        port: u16,
        ssh_user: &str,
        local_root: &Path,
        remote_root: &str,
        ignore_rules: &[String],
    ) -> Result<()> {
        if !self.is_installed() {
            return Err(SyncError::NotInstalled);
        }

        let name = session_name(resource);
        self.terminate(resource)?;

        let mut args = vec![
            "sync".to_string(),
            "create".to_string(),
            "--name".to_string(),
            name.clone(),
            "--sync-mode".to_string(),
            "two-way-safe".to_string(),
        ];
        for rule in ignore_rules {
            args.push("--ignore".to_string());
            args.push(rule.clone());
        }
        args.push(local_root.to_string_lossy().into_owned());
        args.push(format!("{}@localhost:{}:{}", ssh_user, port, remote_root));

        let output = Command::new(&self.bin).args(&args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::CreateFailed(name, stderr.trim().to_string()));
        }

        self.wait_for_watching(resource)
    }

    /// Poll the session toward its steady state. Reaching "watching" (or
    /// "conflicted") succeeds, an error state fails fast, and a timeout is a
    /// soft success: large trees can legitimately still be scanning.
    fn wait_for_watching(&self, resource: &str) -> Result<()> {
        let name = session_name(resource);
        let mut halted = false;

        let settled = wait_until(
            || match self.status(resource).map(|s| s.state) {
                Ok(SyncState::Watching) | Ok(SyncState::Conflicted) => true,
                Ok(SyncState::Error) => {
                    halted = true;
                    true
                }
                _ => false,
            },
            self.poll_interval,
            self.create_timeout,
        );

        if halted {
            return Err(SyncError::ErrorState(
                name,
                "engine reported a halted session".to_string(),
            ));
        }
        if !settled {
            // Large trees can legitimately still be scanning at the deadline
            warn!(
                session = %name,
                "sync session still initializing after {}s, continuing in background",
                self.create_timeout.as_secs()
            );
            return Ok(());
        }

        info!(session = %name, "sync session is watching");
        Ok(())
    }

    /// Rebuild the session on top of an existing tunnel. The tunnel process
    /// being alive proves nothing about the connection behind it, so the
    /// transport is probed end to end first; a dead tunnel fails recovery
    /// and tells the caller to restart from scratch instead of building on
    /// a broken foundation.
    pub fn recover(
        &self,
        resource: &str,
        port: u16,
        ssh_user: &str,
        local_root: &Path,
        remote_root: &str,
        ignore_rules: &[String],
    ) -> Result<()> {
        if !tunnel_reachable(port, ssh_user) {
            return Err(SyncError::TunnelUnreachable(port));
        }
        self.create(resource, port, ssh_user, local_root, remote_root, ignore_rules)
    }

    /// Conflict count and up to [`CONFLICT_SAMPLE_CAP`] sample paths for
    /// user-facing reporting.
    pub fn conflicts(&self, resource: &str) -> Result<(u32, Vec<String>)> {
        let status = self.status(resource)?;
        Ok((status.conflicts, status.samples))
    }

    /// Best-effort termination with a bounded wait; an unresponsive engine
    /// is abandoned rather than allowed to hang process exit.
    pub fn terminate(&self, resource: &str) -> Result<()> {
        let name = session_name(resource);
        let result = run_with_timeout(
            Command::new(&self.bin).args(["sync", "terminate", &name]),
            TERMINATE_TIMEOUT,
        )
        .map_err(|e| SyncError::IoError(std::io::Error::other(e)))?;

        if result.is_none() {
            warn!(session = %name, "sync terminate unresponsive, abandoning");
        }
        Ok(())
    }

    /// Force pending changes through, with a caller-imposed deadline since
    /// flush can block indefinitely.
    pub fn flush(&self, resource: &str) -> Result<()> {
        let name = session_name(resource);
        let result = run_with_timeout(
            Command::new(&self.bin).args(["sync", "flush", &name]),
            self.flush_timeout,
        )
        .map_err(|e| SyncError::IoError(std::io::Error::other(e)))?;

        match result {
            Some(_) => Ok(()),
            None => Err(SyncError::Unresponsive(self.flush_timeout.as_secs())),
        }
    }

    /// Accept current state as the new merge baseline.
    pub fn reset(&self, resource: &str) -> Result<()> {
        let name = session_name(resource);
        let output = Command::new(&self.bin)
            .args(["sync", "reset", &name])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(session = %name, "sync reset failed: {}", stderr.trim());
        }
        Ok(())
    }
}

/// Lightweight end-to-end round trip through the tunnel: if ssh cannot run
/// `true` on the other side, the tunnel is stale no matter how alive the
/// forwarding process looks.
pub fn tunnel_reachable(port: u16, ssh_user: &str) -> bool {
    let result = run_with_timeout(
        Command::new("ssh").args([
            "-p",
            &port.to_string(),
            "-o",
            "BatchMode=yes",
            "-o",
            "ConnectTimeout=5",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            &format!("{}@localhost", ssh_user),
            "true",
        ]),
        SSH_PROBE_TIMEOUT,
    );

    matches!(result, Ok(Some(output)) if output.status.success())
}
