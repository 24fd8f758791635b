//! Sandlink - attach a local working directory to a remote compute sandbox

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use sandlink::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("SANDLINK_DEBUG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter("sandlink=debug")
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completion { shell }) => {
            generate(shell, &mut Cli::command(), "sandlink", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::Connect(args)) => cli::connect::run(args).await,
        Some(Commands::Status(args)) => cli::status::run(args).await,
        Some(Commands::Resync(args)) => cli::resync::run(args).await,
        Some(Commands::Watch(args)) => cli::watch::run(args).await,
        None => cli::connect::run(Default::default()).await,
    }
}
