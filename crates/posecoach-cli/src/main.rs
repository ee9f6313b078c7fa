//! PoseCoach CLI Entry Point

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use posecoach_cli::{exercises, replay, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay(args) => replay::execute(args).await?,
        Commands::Exercises(args) => exercises::list(args)?,
        Commands::Validate(args) => exercises::validate(args)?,
        Commands::Export(args) => exercises::export(args)?,
        Commands::Version => {
            println!("posecoach {}", env!("CARGO_PKG_VERSION"));
            println!("coach module version: {}", posecoach_coach::VERSION);
        }
    }

    Ok(())
}
