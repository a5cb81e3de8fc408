pub mod completion;
pub mod decoder;
pub mod digest;
pub mod emitter;
pub mod metrics;
pub mod notice;
pub mod receiver;
pub mod service;
pub mod table;
pub mod watcher;

pub use completion::{find_holes, inspect, trimmed, Completion};
pub use decoder::{DecodeError, Fragment};
pub use digest::ContentDigest;
pub use emitter::{EmittedMessage, Emitter};
pub use metrics::{MetricsSnapshot, ReassemblyMetrics};
pub use notice::{CompletionNotice, StopReason};
pub use receiver::{ListenerConfig, ListenerPool};
pub use service::ReassemblyService;
pub use table::{ReassemblyTable, DEFAULT_BUFFER_CAPACITY};
pub use watcher::{WatchSummary, Watcher, WatcherConfig};
