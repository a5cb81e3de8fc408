//! `reassembler emit` — send random fragmented test messages.
//!
//! Prints the size and SHA-256 of every message so the listener's report can
//! be compared line by line.

use anyhow::{Context, Result};
use frag_reassembly::emitter::random_message;
use frag_reassembly::Emitter;
use rand::Rng;
use std::net::{SocketAddr, ToSocketAddrs};

pub struct EmitArgs {
    pub target: String,
    pub count: u32,
    pub max_size: usize,
    pub duplicate: bool,
}

pub fn run(args: EmitArgs) -> Result<()> {
    if args.max_size == 0 {
        anyhow::bail!("--max-size must be at least 1");
    }
    let target: SocketAddr = args
        .target
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve target {}", args.target))?
        .next()
        .with_context(|| format!("no address for target {}", args.target))?;

    let emitter = Emitter::new(target)?.with_duplicates(args.duplicate);
    let mut rng = rand::thread_rng();
    for transaction_id in 1..=args.count {
        let len = rng.gen_range(1..=args.max_size);
        let message = random_message(len, &mut rng);
        let sent = emitter.emit(transaction_id, &message, &mut rng)?;
        println!(
            "Emitting message #{} of size:{} sha256:{}",
            sent.transaction_id, sent.len, sent.digest
        );
    }
    Ok(())
}
