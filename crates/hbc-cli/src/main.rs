mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

use commands::{info::InfoCommand, patch::PatchCommand, rewrite::RewriteCommand, verify::VerifyCommand};

#[derive(Parser)]
#[command(name = "hbc", version, about = "Hermes bytecode toolkit")]
struct Cli {
    /// Path to hbc.toml; searched upwards from the current directory by default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print header counts and function summaries
    Info(InfoCommand),
    /// Check that files survive a parse/write round trip
    Verify(VerifyCommand),
    /// Parse a file and write it back out
    Rewrite(RewriteCommand),
    /// Apply patch definitions and write the result
    Patch(PatchCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    let default_directive = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info(cmd) => cmd.run().await?,
        Commands::Verify(cmd) => cmd.run().await?,
        Commands::Rewrite(cmd) => cmd.run().await?,
        Commands::Patch(cmd) => cmd.run(&config).await?,
    }

    Ok(())
}
