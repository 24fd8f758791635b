//! `sandlink status` command implementation

use anyhow::Result;
use serde::Serialize;

use super::definition::StatusArgs;
use crate::lifecycle::SessionContext;
use crate::sync::SyncState;

#[derive(Serialize)]
struct StatusJson {
    resource: String,
    tunnel_alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy_pid: Option<u32>,
    sync_state: String,
    conflicts: u32,
    conflict_samples: Vec<String>,
    referents: usize,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let path = super::resolve_path(args.path)?;
    let ctx = SessionContext::new(&path)?;

    let active = ctx.registry.query_active(&ctx.resource)?;
    let sync = ctx.engine.status(&ctx.resource)?;
    let referents = ctx.registry.live_referents(&ctx.resource)?;

    let report = StatusJson {
        resource: ctx.resource.clone(),
        tunnel_alive: active.is_some(),
        port: active.map(|a| a.port),
        proxy_pid: active.map(|a| a.proxy_pid),
        sync_state: state_label(sync.state).to_string(),
        conflicts: sync.conflicts,
        conflict_samples: sync.samples,
        referents: referents.len(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Resource:  {}", report.resource);
    match (report.port, report.proxy_pid) {
        (Some(port), Some(pid)) => println!("Tunnel:    up (port {}, pid {})", port, pid),
        _ => println!("Tunnel:    down"),
    }
    println!("Sync:      {}", report.sync_state);
    if report.conflicts > 0 {
        println!("Conflicts: {}", report.conflicts);
        for sample in &report.conflict_samples {
            println!("  {}", super::truncate(sample, 70));
        }
        println!("  Run `sandlink resync` to flush and rebuild.");
    }
    println!("Clients:   {}", report.referents);
    Ok(())
}

fn state_label(state: SyncState) -> &'static str {
    match state {
        SyncState::Absent => "absent",
        SyncState::Initializing => "initializing",
        SyncState::Watching => "watching",
        SyncState::Error => "error",
        SyncState::Conflicted => "watching (conflicts)",
    }
}
