//! Blake3 content hashing and hex helpers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Size of a Blake3 hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Type alias for a raw 32-byte hash.
pub type Hash = [u8; HASH_SIZE];

/// Errors that can occur while decoding hex-encoded hashes.
#[derive(Debug, Error)]
pub enum HexError {
    /// The string does not decode to exactly [`HASH_SIZE`] bytes.
    #[error("invalid hash length: expected {expected} hex chars, got {actual}")]
    InvalidLength {
        /// The expected number of hex characters.
        expected: usize,
        /// The actual number of characters.
        actual: usize,
    },

    /// The string contains a non-hex character.
    #[error("invalid hex character at position {position}")]
    InvalidCharacter {
        /// Byte offset of the offending character.
        position: usize,
    },
}

/// Hasher for creation payloads and placement derivation.
pub struct ContentHasher;

impl ContentHasher {
    /// Hashes raw content bytes.
    #[must_use]
    pub fn hash_content(content: &[u8]) -> Hash {
        *blake3::hash(content).as_bytes()
    }

    /// Hashes a sequence of parts under a domain-separation tag.
    ///
    /// Each part is length-prefixed (little-endian u64) before hashing so
    /// that `["ab", "c"]` and `["a", "bc"]` produce distinct digests. Absent
    /// optional parts are encoded as empty parts, which remain distinct from
    /// omitted parts because the part count is fixed per domain.
    #[must_use]
    pub fn hash_parts(domain: &[u8], parts: &[&[u8]]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(domain.len() as u64).to_le_bytes());
        hasher.update(domain);
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        *hasher.finalize().as_bytes()
    }
}

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Decodes a hex string into a raw hash.
///
/// # Errors
///
/// Returns [`HexError`] if the string is not exactly `2 * HASH_SIZE`
/// lowercase-or-uppercase hex characters.
pub fn hex_decode(s: &str) -> Result<Hash, HexError> {
    if s.len() != HASH_SIZE * 2 {
        return Err(HexError::InvalidLength {
            expected: HASH_SIZE * 2,
            actual: s.len(),
        });
    }

    let mut hash = [0u8; HASH_SIZE];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let high = hex_nibble(chunk[0]).ok_or(HexError::InvalidCharacter { position: i * 2 })?;
        let low =
            hex_nibble(chunk[1]).ok_or(HexError::InvalidCharacter { position: i * 2 + 1 })?;
        hash[i] = (high << 4) | low;
    }
    Ok(hash)
}

const fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// A content digest: the Blake3 hash of an immutable creation payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub Hash);

impl Digest {
    /// Computes the digest of the given content.
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        Self(ContentHasher::hash_content(content))
    }

    /// Returns the raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(&self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex_decode(s).map(Self)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex_encode(&self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
