use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::version::VersionKey;

/// Stable 32-byte hash naming a location, domain or content slot.
///
/// Names are hashed with BLAKE3 so that the same human-readable name
/// (a user id, a namespace such as `"profile"`) always maps to the same key
/// on every peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyHash([u8; 32]);

impl KeyHash {
    /// Derive a key from a human-readable name.
    pub fn from_name(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"pv-key-v1:");
        hasher.update(name.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a `KeyHash` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The null key (all zeros).
    pub const fn null() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the null key.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({})", self.short_hex())
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for KeyHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// The (location, domain, content) address of one logical record.
///
/// Version history, write ownership and bulk removal are all scoped to a
/// triple.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyTriple {
    pub location: KeyHash,
    pub domain: KeyHash,
    pub content: KeyHash,
}

impl KeyTriple {
    pub fn new(location: KeyHash, domain: KeyHash, content: KeyHash) -> Self {
        Self {
            location,
            domain,
            content,
        }
    }

    /// Build a triple from three names.
    pub fn from_names(location: &str, domain: &str, content: &str) -> Self {
        Self::new(
            KeyHash::from_name(location),
            KeyHash::from_name(domain),
            KeyHash::from_name(content),
        )
    }

    /// Address a specific revision of this record.
    pub fn at(&self, version: VersionKey) -> VersionedKey {
        VersionedKey {
            triple: *self,
            version,
        }
    }
}

impl fmt::Debug for KeyTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyTriple({}/{}/{})",
            self.location.short_hex(),
            self.domain.short_hex(),
            self.content.short_hex()
        )
    }
}

impl fmt::Display for KeyTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.location.short_hex(),
            self.domain.short_hex(),
            self.content.short_hex()
        )
    }
}

/// Four-part composite address: a [`KeyTriple`] plus a [`VersionKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedKey {
    pub triple: KeyTriple,
    pub version: VersionKey,
}

impl VersionedKey {
    pub fn new(
        location: KeyHash,
        domain: KeyHash,
        content: KeyHash,
        version: VersionKey,
    ) -> Self {
        KeyTriple::new(location, domain, content).at(version)
    }

    pub fn location(&self) -> &KeyHash {
        &self.triple.location
    }

    pub fn domain(&self) -> &KeyHash {
        &self.triple.domain
    }

    pub fn content(&self) -> &KeyHash {
        &self.triple.content
    }

    /// Returns `true` if this key addresses the unversioned slot.
    pub fn is_unversioned(&self) -> bool {
        self.version.is_zero()
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.triple, self.version)
    }
}
