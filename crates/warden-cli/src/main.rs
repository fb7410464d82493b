use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod logger;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = config::Cli::parse();

    match cli.command {
        config::Commands::Run {
            file,
            parallel,
            json,
        } => commands::run::run(file, parallel, json).await,
        config::Commands::Exec {
            timeout,
            tags,
            json,
            args,
        } => commands::exec::exec(args, timeout, tags, json).await,
    }
}
