//! `sandlink connect` command implementation
//!
//! The main operation: join or build the shared session for this directory,
//! attach an interactive terminal into the sandbox, and on the way out run
//! the finalizer no matter how we leave (detach, Ctrl-C, SIGTERM, hangup).

use anyhow::Result;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{info, warn};

use super::definition::ConnectArgs;
use crate::lifecycle::{self, SessionContext};
use crate::sandbox::SbCli;
use crate::terminal::Terminal;

/// The terminating signals whose delivery must still reach the exit
/// finalizer instead of killing the process outright.
struct ExitSignals {
    sigint: Signal,
    sigterm: Signal,
    sighup: Signal,
}

impl ExitSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => info!("interrupted, cleaning up"),
            _ = self.sigterm.recv() => info!("terminated, cleaning up"),
            _ = self.sighup.recv() => info!("hangup, cleaning up"),
        }
    }
}

pub async fn run(args: ConnectArgs) -> Result<()> {
    let path = super::resolve_path(args.path)?;
    if !args.no_attach && !Terminal::is_available() {
        anyhow::bail!(
            "tmux is not installed or not in PATH; rerun with --no-attach to \
             skip the interactive terminal"
        );
    }

    // Installed before any session state exists: every wait below races
    // against these streams so the finalizer runs on any exit path,
    // including an interrupt in the middle of provisioning
    let mut signals = ExitSignals::install()?;

    let ctx = SessionContext::new(&path)?;
    println!("Connecting '{}' ...", ctx.resource);

    let establish_ctx = SessionContext::new(&path)?;
    let mut establish_task = tokio::task::spawn_blocking(move || {
        let control = SbCli::default();
        lifecycle::establish(&establish_ctx, &control)
    });

    let mut interrupted = false;
    let established = tokio::select! {
        result = &mut establish_task => result??,
        _ = signals.recv() => {
            // Establishment cannot be abandoned midway; let it settle so the
            // registry state is consistent, then clean up
            interrupted = true;
            establish_task.await??
        }
    };
    if interrupted {
        lifecycle::finalize(&ctx)?;
        return Ok(());
    }

    if established.joined {
        println!("Joined running session on port {}", established.port);
    } else {
        println!("Session up on port {}", established.port);
    }

    // Sync creation is slow on large trees; run it behind the interactive
    // session and let it fail independently
    let sync_task = if established.sync_pending {
        let sync_ctx = SessionContext::new(&path)?;
        let tunnel_port = established.port;
        Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = lifecycle::create_sync(&sync_ctx, tunnel_port) {
                warn!("{:#}", e);
            }
        }))
    } else {
        None
    };

    if !args.no_attach {
        attach_until_exit(&ctx, established.port, &mut signals).await?;
        // Stop any still-running background work this process owns before
        // unregistering
        if let Some(task) = sync_task {
            task.abort();
        }
    } else if let Some(task) = sync_task {
        // Nothing interactive to hide behind; wait for sync to settle or a
        // terminating signal, whichever comes first
        tokio::select! {
            _ = task => {}
            _ = signals.recv() => {}
        }
    }

    report_conflicts(&ctx);
    lifecycle::finalize(&ctx)?;
    Ok(())
}

/// Attach the terminal and wait for it to end, or for a terminating signal.
async fn attach_until_exit(
    ctx: &SessionContext,
    port: u16,
    signals: &mut ExitSignals,
) -> Result<()> {
    let terminal = Terminal::new(&ctx.resource);
    let command = crate::terminal::ssh_command(
        port,
        &ctx.config.sandbox.ssh_user,
        &ctx.config.sandbox.remote_root,
    );

    let attach = tokio::task::spawn_blocking(move || terminal.attach_or_create(&command));

    tokio::select! {
        result = attach => {
            if let Err(e) = result? {
                warn!("terminal session ended abnormally: {}", e);
            }
        }
        _ = signals.recv() => {}
    }

    Ok(())
}

/// Conflicts are never errors: report them with remediation guidance and
/// move on.
fn report_conflicts(ctx: &SessionContext) {
    let Ok((count, samples)) = ctx.engine.conflicts(&ctx.resource) else {
        return;
    };
    if count == 0 {
        return;
    }

    println!("\nSync has {} conflicted path(s):", count);
    for path in &samples {
        println!("  {}", super::truncate(path, 70));
    }
    if count as usize > samples.len() {
        println!("  ... and {} more", count as usize - samples.len());
    }
    println!("Resolve with `sandlink resync` (accepts both sides, flags divergence).");
}
