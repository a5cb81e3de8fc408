//! Reassembly counters and monotonic timestamps.
//!
//! On Linux, timestamps use `CLOCK_MONOTONIC_RAW` (immune to NTP slew).
//! On other platforms, an `Instant`-based fallback is used.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Nanosecond timestamp via `CLOCK_MONOTONIC_RAW` (Linux) or `Instant` (other platforms).
#[inline(always)]
pub fn now_ns() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::time::Instant;
        static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64
    }
}

/// Atomic reassembly counters.
/// All writes use Relaxed ordering; these are sampling metrics, not synchronisation.
#[derive(Default)]
pub struct ReassemblyMetrics {
    // Ingestion
    pub datagrams_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub decode_errors: AtomicU64,
    /// Datagrams that arrived after shutdown and were not applied.
    pub late_rejected: AtomicU64,

    // Assembly
    pub fragments_applied: AtomicU64,
    pub empty_payloads: AtomicU64,
    /// Fragments whose `offset + len` overran the buffer capacity.
    pub bounds_violations: AtomicU64,
    pub buffers_created: AtomicU64,
    pub buffers_evicted: AtomicU64,
    pub apply_ns: AtomicU64,

    // Output
    pub notices_emitted: AtomicU64,
}

/// Plain-struct snapshot of [`ReassemblyMetrics`] for display (no atomics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub decode_errors: u64,
    pub late_rejected: u64,
    pub fragments_applied: u64,
    pub empty_payloads: u64,
    pub bounds_violations: u64,
    pub buffers_created: u64,
    pub buffers_evicted: u64,
    pub notices_emitted: u64,
    pub avg_apply_ns: u64,
}

impl ReassemblyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean time spent applying a fragment under the table lock, or 0 if none yet.
    pub fn avg_apply_ns(&self) -> u64 {
        let count = self.fragments_applied.load(Relaxed)
            + self.empty_payloads.load(Relaxed)
            + self.bounds_violations.load(Relaxed);
        if count == 0 {
            return 0;
        }
        self.apply_ns.load(Relaxed) / count
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Relaxed),
            bytes_received: self.bytes_received.load(Relaxed),
            decode_errors: self.decode_errors.load(Relaxed),
            late_rejected: self.late_rejected.load(Relaxed),
            fragments_applied: self.fragments_applied.load(Relaxed),
            empty_payloads: self.empty_payloads.load(Relaxed),
            bounds_violations: self.bounds_violations.load(Relaxed),
            buffers_created: self.buffers_created.load(Relaxed),
            buffers_evicted: self.buffers_evicted.load(Relaxed),
            notices_emitted: self.notices_emitted.load(Relaxed),
            avg_apply_ns: self.avg_apply_ns(),
        }
    }
}
