//! SHA-256 content digest of reassembled messages.

use sha2::{Digest, Sha256};
use std::fmt;

/// 256-bit digest; displays as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of(content: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(content);
        let r = h.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&r);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            ContentDigest::of(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            ContentDigest::of(b"abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_deterministic() {
        let a = ContentDigest::of(b"ABCDEFGHIJ");
        let b = ContentDigest::of(&b"ABCDEFGHIJ".to_vec());
        assert_eq!(a, b);
        assert_ne!(a, ContentDigest::of(b"ABCDEFGHIK"));
        assert_eq!(a.to_hex().len(), 64);
    }
}
