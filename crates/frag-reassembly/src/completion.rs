//! Completion and hole detection over a reassembly buffer.
//!
//! Buffers are zero-filled at creation and fragments never record which bytes
//! they wrote, so "written" is approximated by "non-zero". Trailing zeros are
//! treated as unwritten capacity and trimmed; interior zero runs are reported
//! as holes. A payload that legitimately contains zero bytes will show up as a
//! false hole, and one that ends in zeros will trim short. Both are accepted
//! limitations of the heuristic, which is diagnostic rather than a proof of
//! completeness.

/// Result of inspecting one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub trimmed_len: usize,
    /// Start index of every maximal zero run inside the trimmed content, ascending.
    pub holes: Vec<usize>,
}

/// Buffer contents with trailing zero bytes removed. Leading and interior zeros stay.
pub fn trimmed(buf: &[u8]) -> &[u8] {
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &buf[..end]
}

/// Start index of each maximal run of zero bytes, in one left-to-right pass.
///
/// Callers pass trimmed content; on untrimmed input the trailing run is
/// reported like any other.
pub fn find_holes(content: &[u8]) -> Vec<usize> {
    let mut holes = Vec::new();
    let mut prev_zero = false;
    for (i, &b) in content.iter().enumerate() {
        let zero = b == 0;
        if zero && !prev_zero {
            holes.push(i);
        }
        prev_zero = zero;
    }
    holes
}

/// Trim `buf` and scan the trimmed content for holes.
pub fn inspect(buf: &[u8]) -> Completion {
    let content = trimmed(buf);
    Completion {
        trimmed_len: content.len(),
        holes: find_holes(content),
    }
}
