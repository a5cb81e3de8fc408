//! CLI definitions for reassembler.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "reassembler",
    version,
    about = "UDP fragment reassembler\n\nCollects out-of-order, possibly duplicated datagram fragments into whole messages and reports each message's length and SHA-256.",
    long_about = None
)]
pub struct Cli {
    /// Path to reassembler.toml config file (defaults apply if it does not exist)
    #[clap(long, short, default_value = "reassembler.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for fragments and report reassembled messages
    Listen {
        /// UDP port to bind (overrides [listener].bind port)
        #[clap(long)]
        port: Option<u16>,

        /// Number of receive workers
        #[clap(long, env = "CONCURRENCY")]
        concurrency: Option<usize>,

        /// Report once this many transactions have buffers (0 disables)
        #[clap(long)]
        threshold: Option<usize>,

        /// Print hole positions for each message
        #[clap(long)]
        holes: bool,

        /// Also append notices as JSON lines to this file
        #[clap(long)]
        log: Option<PathBuf>,
    },

    /// Send random fragmented test messages to a listener
    Emit {
        /// Listener address
        #[clap(long, default_value = "127.0.0.1:6789")]
        target: String,

        /// Number of messages (transaction ids 1..=count)
        #[clap(long, default_value = "10")]
        count: u32,

        /// Largest message size in bytes
        #[clap(long, default_value = "65535")]
        max_size: usize,

        /// Send every fragment twice
        #[clap(long)]
        duplicate: bool,
    },

    /// Print an example reassembler.toml to stdout
    Init,
}
