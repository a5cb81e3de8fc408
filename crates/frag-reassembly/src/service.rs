//! The reassembly service: one shared instance owning the table, counters and
//! stop state. Listener workers and the watcher each hold an `Arc` to it.

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use crate::decoder::{DecodeError, Fragment};
use crate::metrics::{self, ReassemblyMetrics};
use crate::receiver::EndpointGuard;
use crate::table::{ApplyOutcome, ReassemblyTable, WriteResult};

pub struct ReassemblyService {
    table: ReassemblyTable,
    metrics: Arc<ReassemblyMetrics>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    /// `metrics::now_ns()` of the last applied fragment, or of construction.
    last_activity_ns: AtomicU64,
    /// Receive endpoint to release on shutdown, registered by the listener pool.
    endpoint: Mutex<Option<EndpointGuard>>,
}

impl ReassemblyService {
    pub fn new(default_capacity: usize) -> Arc<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            table: ReassemblyTable::new(default_capacity),
            metrics: Arc::new(ReassemblyMetrics::new()),
            stop_tx,
            stop_rx,
            last_activity_ns: AtomicU64::new(metrics::now_ns()),
            endpoint: Mutex::new(None),
        })
    }

    pub fn table(&self) -> &ReassemblyTable {
        &self.table
    }

    pub fn metrics(&self) -> &Arc<ReassemblyMetrics> {
        &self.metrics
    }

    /// Decode one datagram and apply it to the table.
    ///
    /// Returns `Ok(None)` once the service has stopped: late datagrams are
    /// counted and discarded. Decode failures are counted and returned; they
    /// never affect other datagrams.
    pub fn ingest(&self, datagram: &[u8]) -> Result<Option<ApplyOutcome>, DecodeError> {
        self.metrics.datagrams_received.fetch_add(1, Relaxed);
        self.metrics.bytes_received.fetch_add(datagram.len() as u64, Relaxed);

        if self.is_stopped() {
            self.metrics.late_rejected.fetch_add(1, Relaxed);
            return Ok(None);
        }

        let frag = match Fragment::decode(datagram) {
            Ok(f) => f,
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Relaxed);
                tracing::debug!(err = %e, "dropping undecodable datagram");
                return Err(e);
            }
        };

        let start = metrics::now_ns();
        let outcome = self.table.apply(&frag);
        let done = metrics::now_ns();
        if outcome.write == WriteResult::Closed {
            self.metrics.late_rejected.fetch_add(1, Relaxed);
            return Ok(None);
        }
        self.metrics.apply_ns.fetch_add(done.saturating_sub(start), Relaxed);
        self.last_activity_ns.store(done, Relaxed);

        if outcome.created {
            self.metrics.buffers_created.fetch_add(1, Relaxed);
            tracing::debug!(
                txid = frag.transaction_id,
                capacity = self.table.capacity_of(frag.transaction_id),
                "reassembly buffer created"
            );
        }
        match outcome.write {
            WriteResult::Written => {
                self.metrics.fragments_applied.fetch_add(1, Relaxed);
            }
            WriteResult::EmptyPayload => {
                self.metrics.empty_payloads.fetch_add(1, Relaxed);
            }
            WriteResult::OutOfBounds { end, capacity } => {
                self.metrics.bounds_violations.fetch_add(1, Relaxed);
                tracing::debug!(
                    txid = frag.transaction_id,
                    offset = frag.offset,
                    len = frag.payload.len(),
                    end = ?end,
                    capacity,
                    "fragment overruns buffer, dropped"
                );
            }
            WriteResult::Closed => {}
        }
        Ok(Some(outcome))
    }

    pub fn last_activity_ns(&self) -> u64 {
        self.last_activity_ns.load(Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.table.is_closed()
    }

    /// Ask a running watcher to emit its report and shut down. Without a
    /// watcher, call [`shutdown`](Self::shutdown) directly.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(());
    }

    pub(crate) fn stop_requests(&self) -> &Receiver<()> {
        &self.stop_rx
    }

    pub(crate) fn attach_endpoint(&self, guard: EndpointGuard) {
        let mut slot = self.endpoint.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(guard);
    }

    /// Stop applying datagrams without releasing the receive endpoint.
    /// Once this returns the table content is final: every later datagram is
    /// counted as `late_rejected`. Returns `true` for the call that stopped it.
    pub fn stop_ingest(&self) -> bool {
        let first = self.table.close();
        if first {
            tracing::info!(transactions = self.table.len(), "ingest stopped");
        }
        first
    }

    /// Stop applying datagrams and release the receive endpoint so blocked
    /// workers return. Idempotent.
    pub fn shutdown(&self) {
        self.stop_ingest();
        let guard = self
            .endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(guard) = guard {
            guard.release();
            tracing::info!("listener endpoint released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(txid: u32, offset: u32, payload: &[u8]) -> Vec<u8> {
        Fragment {
            end_of_message: false,
            declared_size: 0,
            offset,
            transaction_id: txid,
            payload,
        }
        .encode()
    }

    #[test]
    fn test_ingest_counts_outcomes() {
        let svc = ReassemblyService::new(8);
        svc.ingest(&datagram(1, 0, b"abc")).unwrap();
        svc.ingest(&datagram(1, 6, b"xyz")).unwrap();
        svc.ingest(&datagram(2, 0, b"")).unwrap();
        assert!(svc.ingest(&[0u8; 5]).is_err());

        let m = svc.metrics().snapshot();
        assert_eq!(m.datagrams_received, 4);
        assert_eq!(m.fragments_applied, 1);
        assert_eq!(m.bounds_violations, 1);
        assert_eq!(m.empty_payloads, 1);
        assert_eq!(m.decode_errors, 1);
        assert_eq!(m.buffers_created, 2);
        assert_eq!(svc.table().content(1).unwrap(), b"abc");
    }

    #[test]
    fn test_ingest_after_shutdown_rejected() {
        let svc = ReassemblyService::new(8);
        svc.ingest(&datagram(1, 0, b"a")).unwrap();
        svc.shutdown();
        svc.shutdown();
        assert!(svc.is_stopped());
        assert_eq!(svc.ingest(&datagram(2, 0, b"b")).unwrap(), None);
        assert!(!svc.table().contains(2));
        assert_eq!(svc.metrics().snapshot().late_rejected, 1);
    }

    #[test]
    fn test_stop_ingest_freezes_table() {
        let svc = ReassemblyService::new(8);
        svc.ingest(&datagram(1, 0, b"a")).unwrap();
        assert!(svc.stop_ingest());
        assert!(!svc.stop_ingest());
        assert!(svc.is_stopped());
        assert_eq!(svc.ingest(&datagram(1, 1, b"b")).unwrap(), None);
        assert_eq!(svc.table().content(1).unwrap(), b"a");
        assert_eq!(svc.metrics().snapshot().late_rejected, 1);
        svc.shutdown();
    }

    #[test]
    fn test_activity_advances() {
        let svc = ReassemblyService::new(8);
        let before = svc.last_activity_ns();
        svc.ingest(&datagram(1, 0, b"a")).unwrap();
        assert!(svc.last_activity_ns() >= before);
    }
}
