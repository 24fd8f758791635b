//! Lifecycle coordination
//!
//! Ties the registry, port allocator, proxy supervisor, sync adapter, and
//! readiness cache together on process start and process exit. All mutable
//! session state lives in an explicit [`SessionContext`] threaded through
//! the calls; there are no module-level globals, which keeps the
//! single-writer invariants auditable.
//!
//! Coordination is inter-process only: the filesystem registry plus signals.
//! Registry writes carry no lock beyond the scan lock; correctness relies on
//! single-writer-per-step invariants (only the process that started the
//! tunnel publishes it) and on every reader re-validating liveness instead
//! of trusting files. Two simultaneous cold starts are tolerated: the
//! loser's tunnel becomes an orphan, reaped by the next invocation's sweep.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::proxy::ProxySupervisor;
use crate::readiness::ReadinessCache;
use crate::registry::Registry;
use crate::sandbox::{ControlPlane, Sandbox};
use crate::sync::{self, SyncEngine, SyncState};
use crate::wait::wait_until;
use crate::{ignore, port, process, resource};

const GRACE_POLL: Duration = Duration::from_secs(1);
const TUNNEL_KILL_GRACE: Duration = Duration::from_secs(5);

/// Everything one invocation knows about the session it participates in.
pub struct SessionContext {
    pub resource: String,
    pub local_root: PathBuf,
    pub config: Config,
    pub registry: Registry,
    pub readiness: ReadinessCache,
    pub engine: SyncEngine,
    pub client_pid: u32,
}

impl SessionContext {
    pub fn new(path: &Path) -> Result<Self> {
        let config = Config::load()?;
        let resource = resource::resource_name(path)?;
        let local_root = resource::local_root(path)?;
        let engine = SyncEngine::new(&config.sync);

        Ok(Self {
            resource,
            local_root,
            registry: Registry::open_default()?,
            readiness: ReadinessCache::open_default()?,
            engine,
            config,
            client_pid: std::process::id(),
        })
    }

    pub fn ignore_rules(&self) -> Vec<String> {
        ignore::compile(&self.local_root)
    }
}

/// Outcome of `establish`: the tunnel endpoint this client now depends on,
/// and whether the sync session still needs to be created (cold path; the
/// caller runs creation in the background so interactive use is not blocked).
pub struct Established {
    pub port: u16,
    pub proxy_pid: u32,
    pub joined: bool,
    pub sync_pending: bool,
}

/// Bring this client into the shared session for the resource.
///
/// Fast path: a live tunnel is already recorded, so just register and go,
/// with no remote round trips. Registration happens before the session is
/// validated: validation can run a full sync recovery that outlasts the
/// grace window, and a pending teardown watcher must see this client the
/// moment it commits to joining. If the tunnel is live but its sync session
/// vanished (engine daemon restart), recovery runs inline; a failed recovery
/// declares the tunnel stale, drops the transient registration, and falls
/// through to a full cold/warm start.
pub fn establish<T: ControlPlane>(ctx: &SessionContext, control: &T) -> Result<Established> {
    if let Some(active) = ctx.registry.query_active(&ctx.resource)? {
        ctx.registry.register(&ctx.resource, ctx.client_pid)?;
        match join_active(ctx, active.port) {
            Ok(()) => {
                info!(resource = %ctx.resource, port = active.port, "joined active session");
                return Ok(Established {
                    port: active.port,
                    proxy_pid: active.proxy_pid,
                    joined: true,
                    sync_pending: false,
                });
            }
            Err(e) => {
                warn!(
                    resource = %ctx.resource,
                    "recorded session unusable ({}), restarting from scratch",
                    e
                );
                ctx.registry.unregister(&ctx.resource, ctx.client_pid)?;
                process::terminate(active.proxy_pid, TUNNEL_KILL_GRACE);
                ctx.registry.clear_active(&ctx.resource)?;
            }
        }
    }

    // Cold start vs. warm start
    let sandbox = Sandbox::new(&ctx.resource, control);
    if !ctx.readiness.is_ready(&ctx.resource) {
        provision(ctx, &sandbox)?;
        ctx.readiness.mark_ready(&ctx.resource)?;
    } else if !sandbox.exists()? {
        // Warm-start probe found the sandbox gone (recycled); provision again
        debug!(resource = %ctx.resource, "sandbox disappeared, re-provisioning");
        provision(ctx, &sandbox)?;
        ctx.readiness.mark_ready(&ctx.resource)?;
    }

    let local_port = port::allocate(&ctx.resource)?;
    let supervisor = ProxySupervisor::new(control, &ctx.registry);
    let proxy_pid = supervisor.start(&ctx.resource, local_port, ctx.config.sandbox.remote_port)?;

    if !sync::tunnel_reachable(local_port, &ctx.config.sandbox.ssh_user) {
        process::terminate(proxy_pid, TUNNEL_KILL_GRACE);
        ctx.registry.clear_active(&ctx.resource)?;
        bail!(
            "Sandbox '{}' is not reachable through the tunnel on port {}",
            ctx.resource,
            local_port
        );
    }

    // Register before sync creation: sync runs in the background and may
    // fail independently without blocking interactive use
    ctx.registry.register(&ctx.resource, ctx.client_pid)?;

    Ok(Established {
        port: local_port,
        proxy_pid,
        joined: false,
        sync_pending: true,
    })
}

/// Validate the fast path: the tunnel is live, but is the sync session still
/// there? Session listing is local and cheap; only a vanished session costs
/// a transport probe.
fn join_active(ctx: &SessionContext, tunnel_port: u16) -> Result<()> {
    let status = ctx.engine.status(&ctx.resource)?;
    if status.state != SyncState::Absent {
        return Ok(());
    }

    info!(resource = %ctx.resource, "sync session vanished, recovering over live tunnel");
    ctx.engine
        .recover(
            &ctx.resource,
            tunnel_port,
            &ctx.config.sandbox.ssh_user,
            &ctx.local_root,
            &ctx.config.sandbox.remote_root,
            &ctx.ignore_rules(),
        )
        .context("sync recovery over existing tunnel failed")?;
    Ok(())
}

/// Full provisioning: create the sandbox (with retries) and run every
/// configured step inside it. Steps are idempotent by contract, so a lost
/// readiness marker just means this runs again.
fn provision<T: ControlPlane>(ctx: &SessionContext, sandbox: &Sandbox<T>) -> Result<()> {
    sandbox.ensure_exists(
        ctx.config.provision.image.as_deref(),
        ctx.config.sandbox.create_attempts,
    )?;

    for step in &ctx.config.provision.steps {
        info!(resource = %ctx.resource, step, "running provisioning step");
        sandbox.run_step(step, &ctx.config.sandbox.remote_root)?;
    }
    Ok(())
}

/// Create the sync session on the cold path. Called from a background task;
/// a failure degrades to "sync inactive" instead of killing the session.
pub fn create_sync(ctx: &SessionContext, tunnel_port: u16) -> Result<()> {
    ctx.engine
        .create(
            &ctx.resource,
            tunnel_port,
            &ctx.config.sandbox.ssh_user,
            &ctx.local_root,
            &ctx.config.sandbox.remote_root,
            &ctx.ignore_rules(),
        )
        .context("sync session creation failed; continuing without sync")?;
    Ok(())
}

/// Exit finalizer: drop this client's reference and, when it was the last
/// live one, hand teardown to a detached grace watcher instead of doing it
/// now. A near-immediate reconnect then adopts the still-live infrastructure
/// instead of rebuilding it.
pub fn finalize(ctx: &SessionContext) -> Result<()> {
    let is_last = ctx.registry.unregister(&ctx.resource, ctx.client_pid)?;
    if !is_last {
        debug!(resource = %ctx.resource, "other referents remain, leaving infrastructure up");
        return Ok(());
    }

    spawn_grace_watcher(&ctx.resource, ctx.config.lifecycle.grace_secs)
}

/// Re-exec ourselves as a detached watcher process so the grace window
/// survives this client's exit.
fn spawn_grace_watcher(resource: &str, grace_secs: u64) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    Command::new(exe)
        .args(["watch", resource, "--grace-secs", &grace_secs.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Cannot spawn grace watcher")?;
    info!(resource, grace_secs, "grace watcher spawned");
    Ok(())
}

/// What the grace watcher does when the window expires. A trait seam so the
/// wait-and-teardown logic is testable without real tunnels or sync daemons.
pub trait Teardown {
    fn terminate_sync(&self, resource: &str);
    fn kill_tunnel(&self, proxy_pid: u32);
}

pub struct EngineTeardown<'a> {
    pub engine: &'a SyncEngine,
}

impl Teardown for EngineTeardown<'_> {
    fn terminate_sync(&self, resource: &str) {
        if let Err(e) = self.engine.terminate(resource) {
            warn!(resource, "sync terminate during teardown failed: {}", e);
        }
    }

    fn kill_tunnel(&self, proxy_pid: u32) {
        process::terminate(proxy_pid, TUNNEL_KILL_GRACE);
    }
}

/// The grace-window watcher: waits out the window, polling for a new
/// referent the whole time (not just at the start, to close the race between
/// a reconnect and teardown). A reconnect cancels teardown entirely.
pub struct GraceWatcher {
    registry: Registry,
    window: Duration,
    poll: Duration,
}

impl GraceWatcher {
    pub fn new(registry: Registry, window: Duration) -> Self {
        Self {
            registry,
            window,
            poll: GRACE_POLL,
        }
    }

    #[cfg(test)]
    fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Returns true if infrastructure was torn down, false if a reconnecting
    /// client adopted it.
    pub fn run(&self, resource: &str, teardown: &dyn Teardown) -> Result<bool> {
        let reconnected = wait_until(
            || {
                !self
                    .registry
                    .live_referents(resource)
                    .unwrap_or_default()
                    .is_empty()
            },
            self.poll,
            self.window,
        );

        if reconnected {
            info!(resource, "client reconnected within grace window, keeping infrastructure");
            return Ok(false);
        }

        info!(resource, "grace window elapsed, tearing down");
        teardown.terminate_sync(resource);
        if let Some(recorded) = self.registry.recorded_tunnel(resource)? {
            // The pid may have been recycled during the window; only kill it
            // if it still runs this resource's tunnel
            let signature = crate::proxy::tunnel_signature(resource);
            if process::find_by_cmdline(&signature).contains(&recorded.proxy_pid) {
                teardown.kill_tunnel(recorded.proxy_pid);
            } else {
                debug!(
                    resource,
                    pid = recorded.proxy_pid,
                    "recorded pid is not a tunnel process anymore, skipping kill"
                );
            }
        }
        self.registry.destroy(resource)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTeardown {
        calls: Mutex<Vec<String>>,
    }

    impl Teardown for RecordingTeardown {
        fn terminate_sync(&self, resource: &str) {
            self.calls.lock().unwrap().push(format!("sync:{}", resource));
        }
        fn kill_tunnel(&self, proxy_pid: u32) {
            self.calls.lock().unwrap().push(format!("tunnel:{}", proxy_pid));
        }
    }

    fn registry() -> (TempDir, Registry) {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(temp.path().join("resources"));
        (temp, registry)
    }

    /// A live process whose command line carries the tunnel signature for
    /// `resource`, standing in for a real forward process.
    fn decoy_tunnel(resource: &str) -> std::process::Child {
        let signature = crate::proxy::tunnel_signature(resource);
        std::process::Command::new("sh")
            .args(["-c", "sleep 60", signature.as_str()])
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_grace_window_expiry_tears_everything_down() {
        let (_temp, registry) = registry();
        let mut decoy = decoy_tunnel("res");
        registry.publish("res", 45123, decoy.id()).unwrap();

        let teardown = RecordingTeardown::default();
        let watcher = GraceWatcher::new(registry.clone(), Duration::from_millis(300))
            .with_poll(Duration::from_millis(50));

        let torn_down = watcher.run("res", &teardown).unwrap();
        assert!(torn_down);

        let calls = teardown.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            ["sync:res".to_string(), format!("tunnel:{}", decoy.id())]
        );
        assert!(!registry.resource_dir("res").exists());

        let _ = decoy.kill();
        let _ = decoy.wait();
    }

    #[test]
    fn test_teardown_skips_recycled_proxy_pid() {
        let (_temp, registry) = registry();
        // The recorded pid no longer belongs to a tunnel process
        registry.publish("res-recycled", 45123, 999999).unwrap();

        let teardown = RecordingTeardown::default();
        let watcher = GraceWatcher::new(registry.clone(), Duration::from_millis(200))
            .with_poll(Duration::from_millis(50));

        assert!(watcher.run("res-recycled", &teardown).unwrap());
        // Sync terminated and the registry removed, but no signal sent
        assert_eq!(
            teardown.calls.lock().unwrap().as_slice(),
            ["sync:res-recycled"]
        );
        assert!(!registry.resource_dir("res-recycled").exists());
    }

    #[test]
    fn test_grace_window_reconnect_cancels_teardown() {
        let (_temp, registry) = registry();
        registry.publish("res", 45123, 999999).unwrap();

        let teardown = RecordingTeardown::default();
        let watcher = GraceWatcher::new(registry.clone(), Duration::from_secs(5))
            .with_poll(Duration::from_millis(50));

        // A client reconnects partway through the window
        let registrar = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                registry.register("res", std::process::id()).unwrap();
            })
        };

        let torn_down = watcher.run("res", &teardown).unwrap();
        registrar.join().unwrap();

        assert!(!torn_down);
        assert!(teardown.calls.lock().unwrap().is_empty());
        // The reconnecting client still sees the recorded tunnel
        assert!(registry.recorded_tunnel("res").unwrap().is_some());
    }

    #[test]
    fn test_grace_window_expiry_without_recorded_tunnel() {
        let (_temp, registry) = registry();
        std::fs::create_dir_all(registry.resource_dir("res")).unwrap();

        let teardown = RecordingTeardown::default();
        let watcher = GraceWatcher::new(registry.clone(), Duration::from_millis(200))
            .with_poll(Duration::from_millis(50));

        assert!(watcher.run("res", &teardown).unwrap());
        // No tunnel recorded: sync terminated, no kill attempted
        assert_eq!(teardown.calls.lock().unwrap().as_slice(), ["sync:res"]);
    }
}
