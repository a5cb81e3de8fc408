//! Periodic observer of the reassembly table.
//!
//! Every `poll_interval` the watcher evicts over-age buffers (if configured)
//! and checks its stop triggers: the table holding exactly the completion
//! threshold, the table having overshot it between ticks, the idle timeout, or
//! an explicit [`ReassemblyService::request_stop`]. When one fires it first
//! stops ingest so the table is final, then inspects the buffers, sends one
//! [`CompletionNotice`] per transaction to the sink, and finally releases the
//! listener pool. A threshold stop reports at most `completion_threshold`
//! transactions, lowest ids first.
//!
//! The watcher never removes entries except through age-based eviction.

use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::completion;
use crate::digest::ContentDigest;
use crate::metrics;
use crate::notice::{CompletionNotice, StopReason};
use crate::service::ReassemblyService;
use crate::table::BufferSnapshot;

pub const DEFAULT_COMPLETION_THRESHOLD: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Stop once the table holds this many transactions. `None` disables.
    pub completion_threshold: Option<usize>,
    pub poll_interval: Duration,
    /// Stop when no fragment has been applied for this long. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Evict buffers created longer ago than this. `None` keeps them until shutdown.
    pub max_buffer_age: Option<Duration>,
    /// Include hole positions in notices.
    pub report_holes: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            completion_threshold: Some(DEFAULT_COMPLETION_THRESHOLD),
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout: None,
            max_buffer_age: None,
            report_holes: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub reason: StopReason,
    pub notices: usize,
}

pub struct Watcher {
    service: Arc<ReassemblyService>,
    config: WatcherConfig,
    sink: Sender<CompletionNotice>,
}

impl Watcher {
    pub fn new(
        service: Arc<ReassemblyService>,
        config: WatcherConfig,
        sink: Sender<CompletionNotice>,
    ) -> Self {
        Self { service, config, sink }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<WatchSummary>> {
        std::thread::Builder::new()
            .name("frag-watcher".into())
            .spawn(move || self.run())
            .context("failed to spawn watcher thread")
    }

    pub fn run(self) -> WatchSummary {
        tracing::info!(
            threshold = ?self.config.completion_threshold,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "watcher started"
        );

        let reason = loop {
            match self.service.stop_requests().recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break StopReason::Requested,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if let Some(reason) = self.tick(Instant::now()) {
                break reason;
            }
        };

        self.service.stop_ingest();
        let limit = match reason {
            StopReason::Threshold | StopReason::Overshoot => self.config.completion_threshold,
            StopReason::Idle | StopReason::Requested => None,
        };
        let notices = self.emit_all(limit);
        tracing::info!(reason = ?reason, notices, "watcher finished");
        self.service.shutdown();
        WatchSummary { reason, notices }
    }

    fn tick(&self, now: Instant) -> Option<StopReason> {
        let table = self.service.table();

        if let Some(max_age) = self.config.max_buffer_age {
            let evicted = table.evict_older_than(max_age, now);
            if !evicted.is_empty() {
                self.service
                    .metrics()
                    .buffers_evicted
                    .fetch_add(evicted.len() as u64, Relaxed);
                tracing::info!(count = evicted.len(), txids = ?evicted, "evicted stale buffers");
            }
        }

        let len = table.len();
        tracing::debug!(transactions = len, "watcher tick");

        if let Some(threshold) = self.config.completion_threshold {
            match len.cmp(&threshold) {
                Ordering::Equal => return Some(StopReason::Threshold),
                Ordering::Greater => return Some(StopReason::Overshoot),
                Ordering::Less => {}
            }
        }
        if let Some(idle) = self.config.idle_timeout {
            let quiet_ns = metrics::now_ns().saturating_sub(self.service.last_activity_ns());
            if u128::from(quiet_ns) >= idle.as_nanos() {
                return Some(StopReason::Idle);
            }
        }
        None
    }

    fn emit_all(&self, limit: Option<usize>) -> usize {
        let mut snapshot = self.service.table().snapshot();
        if let Some(limit) = limit {
            if snapshot.len() > limit {
                let unreported: Vec<u32> = snapshot
                    .split_off(limit)
                    .iter()
                    .map(|s| s.transaction_id)
                    .collect();
                tracing::warn!(
                    count = unreported.len(),
                    txids = ?unreported,
                    "transactions beyond the completion threshold not reported"
                );
            }
        }

        let mut sent = 0;
        for (i, snap) in snapshot.into_iter().enumerate() {
            let notice = build_notice(i + 1, snap, self.config.report_holes);
            if notice.size_mismatch() {
                tracing::warn!(
                    txid = notice.transaction_id,
                    declared = ?notice.declared_size,
                    trimmed = notice.trimmed_len,
                    "trimmed length disagrees with declared size"
                );
            }
            if self.sink.send(notice).is_err() {
                tracing::warn!("completion sink closed; remaining notices dropped");
                break;
            }
            sent += 1;
        }
        self.service
            .metrics()
            .notices_emitted
            .fetch_add(sent as u64, Relaxed);
        sent
    }
}

/// Run the completion/hole detector and the digest over one copied-out buffer.
pub fn build_notice(index: usize, snap: BufferSnapshot, report_holes: bool) -> CompletionNotice {
    let inspected = completion::inspect(&snap.content);
    let holes = if report_holes { inspected.holes } else { Vec::new() };
    CompletionNotice {
        index,
        transaction_id: snap.transaction_id,
        trimmed_len: inspected.trimmed_len,
        capacity: snap.capacity,
        declared_size: snap.declared_size,
        digest: ContentDigest::of(&snap.content).to_hex(),
        holes,
    }
}
