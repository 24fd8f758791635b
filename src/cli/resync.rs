//! `sandlink resync` command implementation
//!
//! Reconcile sync state: flush what can be flushed, terminate the session,
//! and rebuild it from scratch. The flush and terminate are synchronous and
//! bounded; the rebuild runs in a detached worker so the caller gets their
//! shell back immediately.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::warn;

use super::definition::ResyncArgs;
use crate::lifecycle::{self, SessionContext};
use crate::sandbox::SbCli;

pub async fn run(args: ResyncArgs) -> Result<()> {
    let path = super::resolve_path(args.path)?;

    if args.foreground {
        return rebuild(&path).await;
    }

    let ctx = SessionContext::new(&path)?;

    println!("Flushing pending changes for '{}' ...", ctx.resource);
    if let Err(e) = ctx.engine.flush(&ctx.resource) {
        // A wedged session is exactly what resync exists to fix
        warn!("flush failed, rebuilding anyway: {}", e);
    }
    ctx.engine.terminate(&ctx.resource)?;
    ctx.readiness.invalidate(&ctx.resource)?;

    spawn_rebuild_worker(&path)?;
    println!("Rebuilding sync in the background. Check `sandlink status`.");
    Ok(())
}

/// The detached worker: a full establish pass (re-provisioning included,
/// since the readiness marker was just invalidated) plus sync creation,
/// then a normal finalize so the reference count stays balanced.
async fn rebuild(path: &std::path::Path) -> Result<()> {
    let ctx = SessionContext::new(path)?;
    let control = SbCli::default();

    let established = lifecycle::establish(&ctx, &control)?;
    if established.sync_pending {
        lifecycle::create_sync(&ctx, established.port)?;
    }
    lifecycle::finalize(&ctx)?;
    Ok(())
}

fn spawn_rebuild_worker(path: &std::path::Path) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    Command::new(exe)
        .arg("resync")
        .arg(path)
        .arg("--foreground")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Cannot spawn resync worker")?;
    Ok(())
}
