//! Test-traffic sender.
//!
//! Splits messages into randomly sized, non-overlapping fragments, shuffles
//! them, and sends each as one datagram. The fragment at the highest offset
//! carries the end-of-message flag and the full message length.

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::{SocketAddr, UdpSocket};
use std::ops::Range;

use crate::decoder::{Fragment, MAX_PAYLOAD_LEN};
use crate::digest::ContentDigest;

/// Split `0..len` into consecutive ranges of 1..=`max_payload` bytes, in random order.
pub fn plan_fragments<R: Rng + ?Sized>(len: usize, max_payload: usize, rng: &mut R) -> Vec<Range<usize>> {
    let max_payload = max_payload.max(1);
    let mut ranges = Vec::with_capacity(len / max_payload + 1);
    let mut pos = 0;
    while pos < len {
        let take = rng.gen_range(1..=max_payload.min(len - pos));
        ranges.push(pos..pos + take);
        pos += take;
    }
    ranges.shuffle(rng);
    ranges
}

/// Encode `message` as datagrams following `plan`.
///
/// Messages longer than `u16::MAX` cannot state their size in the header; the
/// declared size saturates and a warning is logged.
pub fn encode_message(transaction_id: u32, message: &[u8], plan: &[Range<usize>]) -> Vec<Vec<u8>> {
    let declared_size = u16::try_from(message.len()).unwrap_or_else(|_| {
        tracing::warn!(
            txid = transaction_id,
            len = message.len(),
            "message exceeds 16-bit declared size; header saturates"
        );
        u16::MAX
    });
    let last_start = plan.iter().map(|r| r.start).max();
    plan.iter()
        .map(|r| {
            Fragment {
                end_of_message: Some(r.start) == last_start,
                declared_size,
                offset: r.start as u32,
                transaction_id,
                payload: &message[r.clone()],
            }
            .encode()
        })
        .collect()
}

/// Random message of `len` bytes drawn from `1..=255`, so zero-trimming
/// recovers the exact length.
pub fn random_message<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<u8> {
    (0..len).map(|_| rng.gen_range(1..=255u8)).collect()
}

#[derive(Debug, Clone)]
pub struct EmittedMessage {
    pub transaction_id: u32,
    pub len: usize,
    pub digest: ContentDigest,
    pub datagrams: usize,
}

pub struct Emitter {
    socket: UdpSocket,
    target: SocketAddr,
    max_payload: usize,
    /// Send every datagram twice.
    duplicate: bool,
}

impl Emitter {
    pub fn new(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(local).context("failed to bind emitter socket")?;
        Ok(Self { socket, target, max_payload: MAX_PAYLOAD_LEN, duplicate: false })
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.max(1);
        self
    }

    pub fn with_duplicates(mut self, duplicate: bool) -> Self {
        self.duplicate = duplicate;
        self
    }

    /// Fragment and send one message in random order.
    pub fn emit<R: Rng + ?Sized>(
        &self,
        transaction_id: u32,
        message: &[u8],
        rng: &mut R,
    ) -> Result<EmittedMessage> {
        let plan = plan_fragments(message.len(), self.max_payload, rng);
        let datagrams = encode_message(transaction_id, message, &plan);
        let rounds = if self.duplicate { 2 } else { 1 };
        for _ in 0..rounds {
            for d in &datagrams {
                self.socket
                    .send_to(d, self.target)
                    .with_context(|| format!("failed to send to {}", self.target))?;
            }
        }
        tracing::debug!(txid = transaction_id, fragments = datagrams.len(), "message emitted");
        Ok(EmittedMessage {
            transaction_id,
            len: message.len(),
            digest: ContentDigest::of(message),
            datagrams: datagrams.len() * rounds,
        })
    }
}
