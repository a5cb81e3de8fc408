//! Completion notice types emitted by the watcher.

use serde::Serialize;

/// One reassembled transaction as reported at shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionNotice {
    /// 1-based position in the report, ordered by transaction id.
    pub index: usize,
    pub transaction_id: u32,
    pub trimmed_len: usize,
    pub capacity: usize,
    /// Size carried by the end-of-message fragment, if one arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<u16>,
    /// SHA-256 of the trimmed content, lowercase hex.
    pub digest: String,
    /// Populated only when hole reporting is enabled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<usize>,
}

impl CompletionNotice {
    /// True when an end-of-message fragment arrived and its size disagrees
    /// with the trimmed length.
    pub fn size_mismatch(&self) -> bool {
        self.declared_size
            .is_some_and(|d| d as usize != self.trimmed_len)
    }
}

/// Which trigger ended the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The table held exactly the configured number of transactions.
    Threshold,
    /// The table grew past the configured number between two ticks.
    Overshoot,
    /// No datagram was applied for the configured idle period.
    Idle,
    /// `request_stop` was called on the service.
    Requested,
}
