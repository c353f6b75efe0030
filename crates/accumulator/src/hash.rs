//! Digest type shared by every node in the forest.

use crate::error::AccumulatorError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 32 byte SHA-256 digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Hashes arbitrary bytes into a digest.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Hash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &hex::encode(self.0)[..16])
    }
}

impl FromStr for Hash {
    type Err = AccumulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| AccumulatorError::InvalidData(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            AccumulatorError::InvalidData(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Hash(bytes))
    }
}

/// Computes the parent digest `SHA-256(left || right)`.
///
/// Order matters: swapping the children yields a different parent.
pub fn parent_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sha256() {
        // sha256 of the single byte 0x00
        let h = Hash::digest([0u8]);
        assert_eq!(
            h.to_string(),
            "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
        );
    }

    #[test]
    fn test_parent_hash_is_ordered() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        assert_ne!(parent_hash(&a, &b), parent_hash(&b, &a));

        let mut concat = Vec::new();
        concat.extend_from_slice(a.as_bytes());
        concat.extend_from_slice(b.as_bytes());
        assert_eq!(parent_hash(&a, &b), Hash::digest(&concat));
    }

    #[test]
    fn test_hex_parsing() {
        let h = Hash::digest(b"leaf");
        let parsed: Hash = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);

        assert!("abcd".parse::<Hash>().is_err());
        assert!("zz".repeat(32).parse::<Hash>().is_err());
    }
}
