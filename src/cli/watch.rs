//! `sandlink watch` - the detached grace-window watcher
//!
//! Spawned by the exit finalizer of the last referent. Waits out the grace
//! window, polling the registry for a reconnecting client, and tears the
//! shared infrastructure down only if nobody comes back.

use std::time::Duration;

use anyhow::Result;

use super::definition::WatchArgs;
use crate::config::Config;
use crate::lifecycle::{EngineTeardown, GraceWatcher};
use crate::registry::Registry;
use crate::sync::SyncEngine;
use crate::terminal::Terminal;

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = Config::load()?;
    let registry = Registry::open_default()?;
    let engine = SyncEngine::new(&config.sync);

    let watcher = GraceWatcher::new(registry, Duration::from_secs(args.grace_secs));
    let teardown = EngineTeardown { engine: &engine };
    let torn_down = watcher.run(&args.resource, &teardown)?;

    if torn_down {
        // The detached terminal session would otherwise linger holding a
        // dead ssh connection
        if let Err(e) = Terminal::new(&args.resource).kill() {
            tracing::warn!(resource = %args.resource, "terminal cleanup failed: {}", e);
        }
    }
    Ok(())
}
