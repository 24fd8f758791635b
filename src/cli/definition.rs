//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sandlink",
    about = "Attach a local working directory to a remote compute sandbox",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the sandbox for a directory (the default command)
    Connect(ConnectArgs),

    /// Show tunnel, sync, and referent state for a directory
    Status(StatusArgs),

    /// Flush pending changes, rebuild the sync session in the background
    Resync(ResyncArgs),

    /// Grace-window watcher; spawned internally by the exit path
    #[command(hide = true)]
    Watch(WatchArgs),

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Default)]
pub struct ConnectArgs {
    /// Directory to attach (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Set up tunnel and sync but skip attaching a terminal
    #[arg(long)]
    pub no_attach: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    pub path: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ResyncArgs {
    pub path: Option<PathBuf>,

    /// Run the rebuild in the foreground instead of detaching
    #[arg(long, hide = true)]
    pub foreground: bool,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Resource name to watch
    pub resource: String,

    #[arg(long, default_value_t = 30)]
    pub grace_secs: u64,
}
