//! Terminal multiplexer integration
//!
//! The interactive session into the sandbox lives in a tmux session named
//! after the resource, so a disconnected client can reattach to the same
//! shell. Consumed purely as a process-exec target.

use anyhow::{bail, Result};
use std::process::Command;

pub const SESSION_PREFIX: &str = "sandlink_";

pub struct Terminal {
    name: String,
}

impl Terminal {
    pub fn new(resource: &str) -> Self {
        Self {
            name: format!("{}{}", SESSION_PREFIX, sanitize(resource)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_available() -> bool {
        Command::new("tmux").arg("-V").output().is_ok()
    }

    pub fn exists(&self) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", &self.name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Attach to the session, creating it around `command` first if needed.
    /// Blocks until the user detaches or the session ends.
    pub fn attach_or_create(&self, command: &str) -> Result<()> {
        if !self.exists() {
            let output = Command::new("tmux")
                .args(["new-session", "-d", "-s", &self.name, command])
                .output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("Failed to create terminal session: {}", stderr);
            }
        }

        let attach_verb = if std::env::var("TMUX").is_ok() {
            // Already inside tmux: switch the client instead of nesting
            "switch-client"
        } else {
            "attach-session"
        };

        let status = Command::new("tmux")
            .args([attach_verb, "-t", &self.name])
            .status()?;
        if !status.success() {
            bail!("Failed to attach to terminal session {}", self.name);
        }
        Ok(())
    }

    pub fn kill(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let output = Command::new("tmux")
            .args(["kill-session", "-t", &self.name])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Failed to kill terminal session: {}", stderr);
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The interactive command run inside the terminal session: ssh through the
/// tunnel into the sandbox's workspace.
pub fn ssh_command(port: u16, ssh_user: &str, remote_root: &str) -> String {
    format!(
        "ssh -p {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -t {}@localhost 'cd {} && exec $SHELL -l'",
        port, ssh_user, remote_root
    )
}
