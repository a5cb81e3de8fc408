//! Fragment header parsing and encoding.
//!
//! Every datagram carries one fragment: a fixed 12-byte big-endian header
//! followed by the payload bytes. Decoding is pure and never touches the table, so it
//! runs on the receive worker before any lock is taken.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire layout (all fields big-endian)
//
//   Bytes  0 ..  1 = flags          (u16, bit 15 = END_OF_MESSAGE)
//   Bytes  2 ..  3 = declared size  (u16, meaningful only with END_OF_MESSAGE)
//   Bytes  4 ..  7 = offset         (u32, byte offset of payload in the message)
//   Bytes  8 .. 11 = transaction id (u32)
//   Bytes 12 ..    = payload
// ---------------------------------------------------------------------------

const FLAGS_OFF: usize = 0;
const SIZE_OFF: usize = 2;
const OFFSET_OFF: usize = 4;
const TXID_OFF: usize = 8;

/// Length of the fixed fragment header.
pub const HEADER_LEN: usize = 12;

/// Flag bit marking the final fragment of a message.
pub const END_OF_MESSAGE: u16 = 0x8000;

/// Largest datagram the reference sender produces.
pub const MAX_DATAGRAM_LEN: usize = 512;

/// Largest payload that fits in a [`MAX_DATAGRAM_LEN`] datagram.
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_LEN - HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Datagram is shorter than the fixed header.
    #[error("datagram too short: {len} bytes, header needs {HEADER_LEN}")]
    Truncated { len: usize },
}

/// One decoded datagram. The payload borrows from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub end_of_message: bool,
    /// Final message size. Only meaningful when `end_of_message` is set.
    pub declared_size: u16,
    pub offset: u32,
    pub transaction_id: u32,
    pub payload: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Parse a raw datagram.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated { len: bytes.len() });
        }
        let flags = read_u16(bytes, FLAGS_OFF);
        Ok(Self {
            end_of_message: flags & END_OF_MESSAGE != 0,
            declared_size: read_u16(bytes, SIZE_OFF),
            offset: read_u32(bytes, OFFSET_OFF),
            transaction_id: read_u32(bytes, TXID_OFF),
            payload: &bytes[HEADER_LEN..],
        })
    }

    /// Serialize back into a datagram. Only the end-of-message flag bit is emitted.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        let flags = if self.end_of_message { END_OF_MESSAGE } else { 0 };
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&self.declared_size.to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(self.payload);
        out
    }

    /// Exclusive end of this fragment's byte range, `None` on overflow.
    pub fn end(&self) -> Option<usize> {
        (self.offset as usize).checked_add(self.payload.len())
    }
}

fn read_u16(bytes: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([bytes[off], bytes[off + 1]])
}

fn read_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}
