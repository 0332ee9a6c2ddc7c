use anyhow::Result;
use clap::Parser;
use confluence_copier::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!(command = cli.command.name(), "CLI arguments parsed, invoking run");
    run(cli).await
}
