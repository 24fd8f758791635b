//! Proxy supervisor - the local tunnel process
//!
//! Starts the control plane's port-forward process bridging a local port to
//! the sandbox's service port. The tunnel is detached into its own process
//! group so it outlives the invoking client; killing it belongs exclusively
//! to the grace-window teardown path, never to normal client exit.

use std::fs;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::port;
use crate::process;
use crate::registry::Registry;
use crate::sandbox::ControlPlane;
use crate::wait::wait_until;

const READY_POLL: Duration = Duration::from_millis(250);
const READY_DEADLINE: Duration = Duration::from_secs(15);
const ORPHAN_KILL_GRACE: Duration = Duration::from_secs(3);
const LOG_TAIL_LINES: usize = 20;

/// Command-line signature identifying a resource's tunnel process. Used by
/// the orphan sweep and by teardown to re-validate a recorded pid before
/// sending signals; pids get reused, cmdlines don't lie.
pub fn tunnel_signature(resource: &str) -> String {
    format!("forward {}", resource)
}

pub struct ProxySupervisor<'a, T: ControlPlane> {
    control: &'a T,
    registry: &'a Registry,
}

impl<'a, T: ControlPlane> ProxySupervisor<'a, T> {
    pub fn new(control: &'a T, registry: &'a Registry) -> Self {
        Self { control, registry }
    }

    /// Start the tunnel for this resource on the chosen port, wait until the
    /// port is observably listening, and publish the pid/port pair. Partial
    /// state is never published: on failure the child is killed and captured
    /// output is surfaced in the error.
    pub fn start(&self, resource: &str, local_port: u16, remote_port: u16) -> Result<u32> {
        self.sweep_orphans(resource);

        let args = self.control.forward_args(resource, local_port, remote_port);
        let dir = self.registry.resource_dir(resource);
        fs::create_dir_all(&dir)?;
        let log_path = dir.join("tunnel.log");
        let log = fs::File::create(&log_path)
            .with_context(|| format!("Cannot create tunnel log: {}", log_path.display()))?;

        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            // Own process group: the tunnel must survive this client
            .process_group(0);

        let child = command
            .spawn()
            .with_context(|| format!("Cannot start tunnel: {}", args.join(" ")))?;
        let pid = child.id();
        debug!(resource, pid, local_port, "tunnel process started");

        if !wait_until(|| port::is_listening(local_port), READY_POLL, READY_DEADLINE) {
            process::terminate(pid, ORPHAN_KILL_GRACE);
            let tail = log_tail(&log_path);
            bail!(
                "Tunnel for '{}' never started listening on port {}:\n{}",
                resource,
                local_port,
                tail
            );
        }

        self.registry.publish(resource, local_port, pid)?;
        info!(resource, pid, local_port, "tunnel ready");
        Ok(pid)
    }

    /// Kill orphaned tunnel processes for this resource. These arise when a
    /// prior invocation's cleanup raced with process exit and never recorded
    /// a pid, or when two cold starts raced and one lost.
    pub fn sweep_orphans(&self, resource: &str) {
        for pid in process::find_by_cmdline(&tunnel_signature(resource)) {
            warn!(resource, pid, "killing orphaned tunnel process");
            process::terminate(pid, ORPHAN_KILL_GRACE);
        }
    }
}

fn log_tail(path: &std::path::Path) -> String {
    let Ok(content) = fs::read_to_string(path) else {
        return String::from("(no captured output)");
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}
