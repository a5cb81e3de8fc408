//! `reassembler.toml` configuration.

use anyhow::{Context, Result};
use frag_reassembly::receiver::DEFAULT_PORT;
use frag_reassembly::watcher::{DEFAULT_COMPLETION_THRESHOLD, DEFAULT_POLL_INTERVAL};
use frag_reassembly::{ListenerConfig, WatcherConfig, DEFAULT_BUFFER_CAPACITY};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level reassembler configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReassemblerConfig {
    #[serde(default)]
    pub listener: ListenerSection,
    #[serde(default)]
    pub assembler: AssemblerSection,
    #[serde(default)]
    pub watcher: WatcherSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerSection {
    #[serde(default = "ListenerSection::default_bind")]
    pub bind: String,
    #[serde(default = "ListenerSection::default_concurrency")]
    pub concurrency: usize,
    /// Per-worker datagram buffer in bytes.
    #[serde(default = "ListenerSection::default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Receive timeout per worker; 0 blocks forever.
    #[serde(default)]
    pub read_timeout_ms: u64,
    /// Requested kernel receive buffer; 0 leaves the system default.
    #[serde(default = "ListenerSection::default_socket_recv_buffer_bytes")]
    pub socket_recv_buffer_bytes: usize,
}

impl ListenerSection {
    fn default_bind() -> String { format!("0.0.0.0:{}", DEFAULT_PORT) }
    fn default_concurrency() -> usize { 1 }
    fn default_recv_buffer_size() -> usize { 512 }
    fn default_socket_recv_buffer_bytes() -> usize { 4 * 1024 * 1024 }
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            concurrency: Self::default_concurrency(),
            recv_buffer_size: Self::default_recv_buffer_size(),
            read_timeout_ms: 0,
            socket_recv_buffer_bytes: Self::default_socket_recv_buffer_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssemblerSection {
    /// Capacity of a buffer created before the message size is known.
    #[serde(default = "AssemblerSection::default_buffer_capacity")]
    pub default_buffer_capacity: usize,
}

impl AssemblerSection {
    fn default_buffer_capacity() -> usize { DEFAULT_BUFFER_CAPACITY }
}

impl Default for AssemblerSection {
    fn default() -> Self {
        Self { default_buffer_capacity: Self::default_buffer_capacity() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherSection {
    /// Report and stop once this many transactions have buffers; 0 disables.
    #[serde(default = "WatcherSection::default_completion_threshold")]
    pub completion_threshold: usize,
    #[serde(default = "WatcherSection::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Report and stop after this long without a fragment; 0 disables.
    #[serde(default)]
    pub idle_timeout_ms: u64,
    /// Evict buffers older than this; 0 disables.
    #[serde(default)]
    pub max_buffer_age_ms: u64,
    #[serde(default)]
    pub report_holes: bool,
}

impl WatcherSection {
    fn default_completion_threshold() -> usize { DEFAULT_COMPLETION_THRESHOLD }
    fn default_poll_interval_ms() -> u64 { DEFAULT_POLL_INTERVAL.as_millis() as u64 }
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            completion_threshold: Self::default_completion_threshold(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            idle_timeout_ms: 0,
            max_buffer_age_ms: 0,
            report_holes: false,
        }
    }
}

fn nonzero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ReassemblerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    /// Config written by `reassembler init`.
    pub fn default_example() -> Self {
        Self {
            watcher: WatcherSection {
                idle_timeout_ms: 60_000,
                ..WatcherSection::default()
            },
            ..Self::default()
        }
    }

    pub fn listener_config(&self) -> Result<ListenerConfig> {
        let bind_addr: SocketAddr = self
            .listener
            .bind
            .parse()
            .with_context(|| format!("invalid listener bind address: {}", self.listener.bind))?;
        Ok(ListenerConfig {
            bind_addr,
            concurrency: self.listener.concurrency.max(1),
            recv_buffer_size: self.listener.recv_buffer_size,
            read_timeout: nonzero_ms(self.listener.read_timeout_ms),
            socket_recv_buffer: (self.listener.socket_recv_buffer_bytes > 0)
                .then_some(self.listener.socket_recv_buffer_bytes),
        })
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            completion_threshold: (self.watcher.completion_threshold > 0)
                .then_some(self.watcher.completion_threshold),
            poll_interval: Duration::from_millis(self.watcher.poll_interval_ms.max(1)),
            idle_timeout: nonzero_ms(self.watcher.idle_timeout_ms),
            max_buffer_age: nonzero_ms(self.watcher.max_buffer_age_ms),
            report_holes: self.watcher.report_holes,
        }
    }
}
