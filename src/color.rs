//! Terminal rendering of completion notices.
//!
//! ANSI styling is dropped when stdout is not a TTY or `NO_COLOR` is set
//! (https://no-color.org/).

use frag_reassembly::CompletionNotice;
use std::io::IsTerminal;
use std::sync::OnceLock;

static STYLED: OnceLock<bool> = OnceLock::new();

/// Role of a span within a notice line.
#[derive(Debug, Clone, Copy)]
enum Paint {
    Label,
    Digest,
    Warning,
    Detail,
}

impl Paint {
    fn code(self) -> &'static str {
        match self {
            Paint::Label => "1",
            Paint::Digest => "36",
            Paint::Warning => "33",
            Paint::Detail => "2",
        }
    }

    fn apply(self, s: &str) -> String {
        let styled = *STYLED.get_or_init(|| {
            std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
        });
        if styled {
            format!("\x1b[{}m{}\x1b[0m", self.code(), s)
        } else {
            s.to_string()
        }
    }
}

/// `Message #N length: L sha256:HEX`, flagged when the declared size disagrees.
pub fn notice_line(n: &CompletionNotice) -> String {
    let mut line = format!(
        "{} length: {} sha256:{}",
        Paint::Label.apply(&format!("Message #{}", n.index)),
        n.trimmed_len,
        Paint::Digest.apply(&n.digest)
    );
    if n.size_mismatch() {
        if let Some(declared) = n.declared_size {
            line.push_str(&Paint::Warning.apply(&format!(" (declared {})", declared)));
        }
    }
    line.push_str(&Paint::Detail.apply(&format!(" txid={}", n.transaction_id)));
    line
}

/// One line per zero-filled gap found in the message.
pub fn hole_lines(n: &CompletionNotice) -> impl Iterator<Item = String> + '_ {
    n.holes
        .iter()
        .map(move |hole| Paint::Warning.apply(&format!("Message #{} hole at: {}", n.index, hole)))
}
