//! Marginalia command line entry point
//!
//! Usage:
//!   marginalia analyze note.md              Tool-calling analysis
//!   marginalia analyze note.md --blocks     One-shot block analysis
//!   marginalia --config cfg.json analyze …  Use another config file

use anyhow::Result;
use clap::Parser;

use marginalia::cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("marginalia=info".parse()?),
        )
        .init();

    execute(cli).await?;
    Ok(())
}
