//! Session registry - per-resource on-disk coordination state
//!
//! One directory per resource name holds everything independent invocations
//! need to share a tunnel and sync session without a daemon:
//!
//! - `port`       local port the active tunnel is bound to
//! - `proxy.pid`  pid of the tunnel process
//! - `<pid>.user` one reference file per live client process
//!
//! The reference count is the set of `.user` files, not an integer, so a
//! crashed holder is self-describing: its pid is dead and the file is pruned
//! on the next scan. Presence of `port`/`proxy.pid` proves nothing on its
//! own; `query_active` re-validates pid liveness and port listening on every
//! read because pids get reused and files go stale.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::debug;

use crate::{config, port, process};

const LOCK_FILE: &str = ".lock";
const PORT_FILE: &str = "port";
const PROXY_PID_FILE: &str = "proxy.pid";
const USER_SUFFIX: &str = "user";

/// The recorded tunnel endpoint for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTunnel {
    pub port: u16,
    pub proxy_pid: u32,
}

#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(config::state_dir()?.join("resources")))
    }

    pub fn resource_dir(&self, resource: &str) -> PathBuf {
        self.root.join(resource)
    }

    /// Record this client as a referent. Idempotent: registering the same
    /// pid twice leaves exactly one reference file.
    pub fn register(&self, resource: &str, client_pid: u32) -> Result<()> {
        let dir = self.resource_dir(resource);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create registry dir: {}", dir.display()))?;
        fs::write(
            dir.join(format!("{}.{}", client_pid, USER_SUFFIX)),
            client_pid.to_string(),
        )?;
        Ok(())
    }

    /// Remove this client's reference file, prune references whose pids are
    /// no longer alive, and report whether any live referent remains.
    /// Returns true iff this was the last one.
    pub fn unregister(&self, resource: &str, client_pid: u32) -> Result<bool> {
        let dir = self.resource_dir(resource);
        if !dir.exists() {
            return Ok(true);
        }

        let _ = fs::remove_file(dir.join(format!("{}.{}", client_pid, USER_SUFFIX)));
        Ok(self.live_referents(resource)?.is_empty())
    }

    /// Pids of all currently live referents. Reference files whose pid is
    /// dead are pruned as a side effect. The scan holds an advisory lock so
    /// two concurrent exits don't race each other's pruning.
    pub fn live_referents(&self, resource: &str) -> Result<Vec<u32>> {
        let dir = self.resource_dir(resource);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let _lock = self.lock(resource)?;
        let mut live = Vec::new();

        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(USER_SUFFIX) {
                continue;
            }

            let pid: Option<u32> = fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse().ok());

            match pid {
                Some(pid) if process::is_alive(pid) => live.push(pid),
                _ => {
                    debug!(path = %path.display(), "pruning stale reference file");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        Ok(live)
    }

    /// The tunnel recorded for this resource, only if it is actually usable:
    /// the proxy pid must be alive and the port must have a listener. A
    /// stale file pair with a dead (or reused) pid reads as absent.
    pub fn query_active(&self, resource: &str) -> Result<Option<ActiveTunnel>> {
        let Some(recorded) = self.recorded_tunnel(resource)? else {
            return Ok(None);
        };

        if !process::is_alive(recorded.proxy_pid) {
            debug!(resource, pid = recorded.proxy_pid, "recorded proxy pid is dead");
            return Ok(None);
        }
        if !port::is_listening(recorded.port) {
            debug!(resource, port = recorded.port, "recorded port has no listener");
            return Ok(None);
        }

        Ok(Some(recorded))
    }

    /// The raw recorded port/pid pair, without liveness validation. Teardown
    /// uses this to find the process it owns killing.
    pub fn recorded_tunnel(&self, resource: &str) -> Result<Option<ActiveTunnel>> {
        let dir = self.resource_dir(resource);

        let port: Option<u16> = fs::read_to_string(dir.join(PORT_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok());
        let proxy_pid: Option<u32> = fs::read_to_string(dir.join(PROXY_PID_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok());

        Ok(match (port, proxy_pid) {
            (Some(port), Some(proxy_pid)) => Some(ActiveTunnel { port, proxy_pid }),
            _ => None,
        })
    }

    /// Record the tunnel endpoint. Called once, by whichever invocation
    /// actually started the tunnel.
    pub fn publish(&self, resource: &str, port: u16, proxy_pid: u32) -> Result<()> {
        let dir = self.resource_dir(resource);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(PORT_FILE), port.to_string())?;
        fs::write(dir.join(PROXY_PID_FILE), proxy_pid.to_string())?;
        Ok(())
    }

    /// Drop the recorded tunnel endpoint while keeping reference files.
    pub fn clear_active(&self, resource: &str) -> Result<()> {
        let dir = self.resource_dir(resource);
        let _ = fs::remove_file(dir.join(PORT_FILE));
        let _ = fs::remove_file(dir.join(PROXY_PID_FILE));
        Ok(())
    }

    /// Remove the entire registry entry. Only the last referent's teardown
    /// path calls this, after the tunnel and sync session are gone.
    pub fn destroy(&self, resource: &str) -> Result<()> {
        let dir = self.resource_dir(resource);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Cannot remove registry dir: {}", dir.display()))?;
        }
        Ok(())
    }

    fn lock(&self, resource: &str) -> Result<fs::File> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.resource_dir(resource).join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(file)
    }
}
