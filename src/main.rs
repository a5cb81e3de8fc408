//! reassembler — UDP fragment reassembly service.
//!
//! Listens for fragmented messages on a UDP port, stitches them back together
//! regardless of arrival order, and reports each message's length and SHA-256.
//! Run `reassembler --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod color;
mod config;
mod emit;
mod listen;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let example = config::ReassemblerConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::Listen { port, concurrency, threshold, holes, log } => {
            let config = config::ReassemblerConfig::load_or_default(&cli.config)?;
            listen::run(
                config,
                listen::ListenArgs { port, concurrency, threshold, holes, log },
            )?;
        }
        Commands::Emit { target, count, max_size, duplicate } => {
            emit::run(emit::EmitArgs { target, count, max_size, duplicate })?;
        }
    }

    Ok(())
}
