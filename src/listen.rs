//! `reassembler listen` — run the reassembly service until a stop trigger fires.
//!
//! Binds the UDP endpoint, starts the listener pool and the watcher, prints one
//! line per reassembled message, and optionally appends each notice as a JSON
//! line to a log file. Ctrl-C asks the watcher for an early report.

use anyhow::Result;
use frag_reassembly::{CompletionNotice, ListenerPool, ReassemblyService, Watcher};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::color;
use crate::config::ReassemblerConfig;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Default)]
pub struct ListenArgs {
    pub port: Option<u16>,
    pub concurrency: Option<usize>,
    pub threshold: Option<usize>,
    pub holes: bool,
    pub log: Option<PathBuf>,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    ts: String,
    #[serde(flatten)]
    notice: &'a CompletionNotice,
}

pub fn apply_overrides(config: &mut ReassemblerConfig, args: &ListenArgs) -> Result<()> {
    if let Some(port) = args.port {
        let mut addr: SocketAddr = config.listener.bind.parse()?;
        addr.set_port(port);
        config.listener.bind = addr.to_string();
    }
    if let Some(concurrency) = args.concurrency {
        config.listener.concurrency = concurrency;
    }
    if let Some(threshold) = args.threshold {
        config.watcher.completion_threshold = threshold;
    }
    if args.holes {
        config.watcher.report_holes = true;
    }
    Ok(())
}

pub fn run(mut config: ReassemblerConfig, args: ListenArgs) -> Result<()> {
    apply_overrides(&mut config, &args)?;
    let watcher_config = config.watcher_config();
    if watcher_config.completion_threshold.is_none() && watcher_config.idle_timeout.is_none() {
        tracing::warn!("no threshold or idle timeout configured; only Ctrl-C will end the run");
    }

    let service = ReassemblyService::new(config.assembler.default_buffer_capacity);
    let pool = ListenerPool::bind(config.listener_config()?)?;
    eprintln!(
        "reassembler listen — {} worker(s) on {}",
        config.listener.concurrency.max(1),
        pool.local_addr()
    );
    let workers = pool.start(service.clone())?;

    let (notice_tx, notice_rx) = crossbeam_channel::unbounded::<CompletionNotice>();
    let watcher = Watcher::new(service.clone(), watcher_config, notice_tx).spawn()?;

    INTERRUPTED.store(false, Ordering::SeqCst);
    unsafe { libc::signal(libc::SIGINT, handle_sigint as *const () as libc::sighandler_t) };
    let signal_service = service.clone();
    std::thread::Builder::new()
        .name("sigint-watch".into())
        .spawn(move || {
            while !signal_service.is_stopped() {
                if INTERRUPTED.swap(false, Ordering::SeqCst) {
                    eprintln!("interrupted — reporting buffered messages");
                    signal_service.request_stop();
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })?;

    let mut log_file = match &args.log {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };

    for notice in notice_rx {
        println!("{}", color::notice_line(&notice));
        for line in color::hole_lines(&notice) {
            println!("{}", line);
        }
        if let Some(file) = log_file.as_mut() {
            if let Err(e) = append_log(file, &notice) {
                tracing::warn!(err = %e, txid = notice.transaction_id, "failed to append notice to log");
            }
        }
    }

    let summary = watcher
        .join()
        .map_err(|_| anyhow::anyhow!("watcher thread panicked"))?;
    join_workers(workers);

    let stats = service.metrics().snapshot();
    tracing::info!(
        reason = ?summary.reason,
        notices = summary.notices,
        datagrams = stats.datagrams_received,
        decode_errors = stats.decode_errors,
        bounds_violations = stats.bounds_violations,
        late = stats.late_rejected,
        avg_apply_ns = stats.avg_apply_ns,
        "run complete"
    );
    Ok(())
}

/// Append one notice to the JSONL log.
fn append_log<W: Write>(w: &mut W, notice: &CompletionNotice) -> Result<()> {
    let entry = LogEntry { ts: chrono::Utc::now().to_rfc3339(), notice };
    let line = serde_json::to_string(&entry)?;
    writeln!(w, "{}", line)?;
    Ok(())
}

/// Join every listener worker. Returns how many panicked.
fn join_workers(workers: Vec<JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for (id, w) in workers.into_iter().enumerate() {
        if w.join().is_err() {
            panicked += 1;
            tracing::warn!(worker = id, "listener worker panicked; datagrams it held were lost");
        }
    }
    panicked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(declared_size: Option<u16>) -> CompletionNotice {
        CompletionNotice {
            index: 2,
            transaction_id: 7,
            trimmed_len: 10,
            capacity: 10,
            declared_size,
            digest: "ab".repeat(32),
            holes: vec![],
        }
    }

    #[test]
    fn test_overrides() {
        let mut cfg = ReassemblerConfig::default();
        let args = ListenArgs {
            port: Some(7000),
            concurrency: Some(4),
            threshold: Some(0),
            holes: true,
            log: None,
        };
        apply_overrides(&mut cfg, &args).unwrap();
        assert_eq!(cfg.listener.bind, "0.0.0.0:7000");
        assert_eq!(cfg.listener.concurrency, 4);
        assert!(cfg.watcher_config().completion_threshold.is_none());
        assert!(cfg.watcher.report_holes);
    }

    #[test]
    fn test_log_entry_flattens_notice() {
        let n = notice(None);
        let entry = LogEntry { ts: "t".into(), notice: &n };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"trimmed_len\":10"));
        assert!(!json.contains("holes"));
        assert!(!json.contains("declared_size"));
    }

    struct BrokenLog;

    impl Write for BrokenLog {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_append_log() {
        let mut buf = Vec::new();
        append_log(&mut buf, &notice(Some(10))).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"declared_size\":10"));

        assert!(append_log(&mut BrokenLog, &notice(None)).is_err());
    }

    #[test]
    fn test_join_workers_counts_panics() {
        let ok = std::thread::spawn(|| {});
        let bad = std::thread::spawn(|| panic!("worker failed"));
        assert_eq!(join_workers(vec![ok, bad]), 1);
    }
}
