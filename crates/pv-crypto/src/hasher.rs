use std::fmt;

use serde::{Deserialize, Serialize};

/// BLAKE3 digest of a stored payload, handed back to callers that set the
/// hash flag on put so they can sign it in an external step.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// BLAKE3 hasher keyed by a derivation context.
///
/// Payload digests and request digests use different contexts, so one can
/// never stand in for the other even when the input bytes coincide.
#[derive(Clone, Copy, Debug)]
pub struct ContentHasher {
    context: &'static str,
}

impl ContentHasher {
    /// Stored payloads; the hash returned to `put_hashed` callers.
    pub const PAYLOAD: Self = Self::new("peervault 2024 record payload");
    /// The bytes a protection key signs for a put or remove.
    pub const REQUEST: Self = Self::new("peervault 2024 signed request");

    pub const fn new(context: &'static str) -> Self {
        Self { context }
    }

    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new_derive_key(self.context);
        hasher.update(data);
        ContentHash(*hasher.finalize().as_bytes())
    }

    /// Constant-time comparison against an expected digest.
    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        blake3::Hash::from(self.hash(data).0) == blake3::Hash::from(expected.0)
    }

    pub fn context(&self) -> &str {
        self.context
    }
}
